use std::sync::Arc;

use crate::models::Card;

/// Lifecycle phase of a reading, derived from the session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No cards dealt.
    Idle,
    /// Waiting out the dealing delay.
    Loading,
    /// Cards dealt, at least one still face down.
    Active,
    /// Every card is face up.
    Complete,
    /// A start was refused for lack of quota; the login prompt is showing.
    QuotaExhausted,
}

/// One position of the reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSlot {
    id: usize,
    card: Option<Arc<Card>>,
    flipped: bool,
    selected: bool,
}

impl GameSlot {
    pub(crate) fn empty(id: usize) -> Self {
        Self {
            id,
            card: None,
            flipped: false,
            selected: false,
        }
    }

    pub(crate) fn dealt(id: usize, card: Arc<Card>) -> Self {
        Self {
            card: Some(card),
            ..Self::empty(id)
        }
    }

    /// Mark the slot face up. Returns false when it already was.
    pub(crate) fn flip(&mut self) -> bool {
        if self.flipped {
            return false;
        }
        self.flipped = true;
        self.selected = true;
        true
    }

    /// Position of the slot, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Card dealt into the slot.
    pub fn card(&self) -> Option<&Arc<Card>> {
        self.card.as_ref()
    }

    /// True once the card is face up.
    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// True once the player picked this slot.
    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

/// Read-only snapshot of a reading, published after every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    slots: Vec<GameSlot>,
    pub(crate) loading: bool,
    pub(crate) started: bool,
    pub(crate) login_prompt_visible: bool,
    pub(crate) notice: Option<String>,
    pub(crate) remaining_draws: i64,
}

impl SessionState {
    pub(crate) fn new(slot_count: usize, remaining_draws: i64) -> Self {
        Self {
            slots: empty_slots(slot_count),
            loading: false,
            started: false,
            login_prompt_visible: false,
            notice: None,
            remaining_draws,
        }
    }

    pub(crate) fn deal(&mut self, cards: Vec<Arc<Card>>) {
        self.slots = cards
            .into_iter()
            .enumerate()
            .map(|(index, card)| GameSlot::dealt(index + 1, card))
            .collect();
        self.started = true;
    }

    pub(crate) fn clear_slots(&mut self) {
        self.slots = empty_slots(self.slots.len());
        self.started = false;
    }

    pub(crate) fn slot_mut(&mut self, id: usize) -> Option<&mut GameSlot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    /// Slots in position order.
    pub fn slots(&self) -> &[GameSlot] {
        &self.slots
    }

    /// True while cards are being dealt.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True once cards were dealt in this reading.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// True exactly when every slot of a dealt reading is face up.
    pub fn all_revealed(&self) -> bool {
        self.started && !self.slots.is_empty() && self.slots.iter().all(GameSlot::is_flipped)
    }

    /// True while the login prompt should be shown.
    pub fn login_prompt_visible(&self) -> bool {
        self.login_prompt_visible
    }

    /// User-facing failure notice of the last command, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Remaining free draws at the time of the snapshot.
    pub fn remaining_draws(&self) -> i64 {
        self.remaining_draws
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.login_prompt_visible {
            Phase::QuotaExhausted
        } else if self.loading {
            Phase::Loading
        } else if !self.started {
            Phase::Idle
        } else if self.all_revealed() {
            Phase::Complete
        } else {
            Phase::Active
        }
    }

    /// Cards that are face up, in slot order.
    pub fn revealed_cards(&self) -> Vec<Arc<Card>> {
        self.slots
            .iter()
            .filter(|slot| slot.flipped)
            .filter_map(|slot| slot.card.clone())
            .collect()
    }
}

fn empty_slots(count: usize) -> Vec<GameSlot> {
    (1..=count).map(GameSlot::empty).collect()
}
