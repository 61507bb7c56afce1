//! Fair shuffle and draw.

use rand::Rng;
use thiserror::Error;

/// Failure raised when a draw cannot be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    /// More cards were requested than the source holds.
    #[error("cannot draw {requested} cards from a deck of {available}")]
    OutOfRange {
        /// Number of cards asked for.
        requested: usize,
        /// Number of cards in the source.
        available: usize,
    },
}

/// Permute `items` in place so that every ordering is equally likely.
///
/// Walks from the last index down, swapping each position with a uniformly
/// chosen index in `[0, i]`.
pub fn shuffle_in_place<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Return a shuffled copy of `items`, leaving the source untouched.
pub fn shuffled<T: Clone, R: Rng + ?Sized>(items: &[T], rng: &mut R) -> Vec<T> {
    let mut copy = items.to_vec();
    shuffle_in_place(&mut copy, rng);
    copy
}

/// Draw `count` distinct entries of `items`, in the order they came off the
/// shuffled deck.
pub fn draw<'a, T, R: Rng + ?Sized>(
    items: &'a [T],
    count: usize,
    rng: &mut R,
) -> Result<Vec<&'a T>, DrawError> {
    if count > items.len() {
        return Err(DrawError::OutOfRange {
            requested: count,
            available: items.len(),
        });
    }
    let mut deck: Vec<&T> = items.iter().collect();
    shuffle_in_place(&mut deck, rng);
    deck.truncate(count);
    Ok(deck)
}
