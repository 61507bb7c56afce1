//! Static card catalog.

use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::Serialize;
use tracing::warn;

use crate::{
    models::{Card, Suit},
    shuffle::{self, DrawError},
};

/// Base URL of the public-domain Rider-Waite scans.
pub const IMAGE_BASE_URL: &str =
    "https://archive.org/download/rider-waite-tarot/RiderWaiteCards/";

/// Placeholder shown for cards without a known scan.
pub const CARD_BACK_IMAGE: &str = "/image/card-back.png";

const DECK_JSON: &str = include_str!("../data/deck.json");

const IMAGE_FILENAMES: &[(u32, &str)] = &[
    (0, "00-fool.jpg"),
    (1, "01-magician.jpg"),
    (2, "02-high-priestess.jpg"),
    (3, "03-empress.jpg"),
    (4, "04-emperor.jpg"),
    (5, "05-hierophant.jpg"),
    (13, "13-death.jpg"),
    (19, "19-sun.jpg"),
    (36, "swords-ace.jpg"),
    (42, "swords-07.jpg"),
    (50, "cups-ace.jpg"),
    (52, "cups-03.jpg"),
    (64, "wands-ace.jpg"),
    (69, "wands-06.jpg"),
    (78, "pentacles-ace.jpg"),
    (85, "pentacles-08.jpg"),
];

static STANDARD: Lazy<Arc<CardCatalog>> = Lazy::new(|| {
    Arc::new(CardCatalog::from_json(DECK_JSON).expect("embedded deck must be valid"))
});

/// Resolve the artwork URL for a card id.
pub fn image_url(card_id: u32) -> String {
    match IMAGE_FILENAMES.iter().find(|(id, _)| *id == card_id) {
        Some((_, filename)) => format!("{IMAGE_BASE_URL}{filename}"),
        None => {
            warn!(card_id, "no artwork for card; using card back");
            CARD_BACK_IMAGE.to_string()
        }
    }
}

/// Per-suit card counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    /// Total number of cards.
    pub total: usize,
    /// Major arcana.
    pub major: usize,
    /// Swords.
    pub swords: usize,
    /// Cups.
    pub cups: usize,
    /// Wands.
    pub wands: usize,
    /// Pentacles.
    pub pentacles: usize,
}

/// Immutable, ordered set of cards.
///
/// Cards are handed out as `Arc<Card>` so holders may keep them for as long
/// as they like.
#[derive(Debug, Clone)]
pub struct CardCatalog {
    cards: Vec<Arc<Card>>,
}

impl CardCatalog {
    /// The built-in Rider-Waite deck.
    pub fn standard() -> Arc<CardCatalog> {
        Arc::clone(&*STANDARD)
    }

    /// Build a catalog from card records, rejecting duplicate ids.
    pub fn new(cards: Vec<Card>) -> Result<Self> {
        let mut seen = HashSet::new();
        for card in &cards {
            if !seen.insert(card.id) {
                bail!("duplicate card id {}", card.id);
            }
        }
        Ok(Self {
            cards: cards.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parse a JSON array of cards, filling in missing artwork references.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut cards: Vec<Card> =
            serde_json::from_str(json).context("failed to parse card catalog")?;
        for card in &mut cards {
            if card.image_url.is_none() {
                card.image_url = Some(image_url(card.id));
            }
        }
        Self::new(cards)
    }

    /// All cards in catalog order.
    pub fn cards(&self) -> &[Arc<Card>] {
        &self.cards
    }

    /// Look up a card by identifier.
    pub fn get(&self, id: u32) -> Option<Arc<Card>> {
        self.cards.iter().find(|card| card.id == id).cloned()
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when the catalog holds no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Draw `count` distinct cards with a fair shuffle.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Arc<Card>>, DrawError> {
        let hand = shuffle::draw(&self.cards, count, rng)?;
        Ok(hand.into_iter().map(Arc::clone).collect())
    }

    /// Count the cards per suit.
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            total: self.cards.len(),
            ..CatalogStats::default()
        };
        for card in &self.cards {
            let slot = match card.suit {
                Suit::Major => &mut stats.major,
                Suit::Swords => &mut stats.swords,
                Suit::Cups => &mut stats.cups,
                Suit::Wands => &mut stats.wands,
                Suit::Pentacles => &mut stats.pentacles,
            };
            *slot += 1;
        }
        stats
    }
}
