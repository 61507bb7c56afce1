use std::{sync::Arc, time::Duration};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{catalog::CardCatalog, shuffle::DrawError, store::PersistedCounter};

use super::models::{Phase, SessionState};

/// Notice shown when dealing fails.
pub const DRAW_FAILED_NOTICE: &str = "Drawing cards failed, please try again later.";

/// Fixed parameters of a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRules {
    /// Number of slots dealt per reading.
    pub slot_count: usize,
    /// Quota on a fresh install.
    pub initial_draws: i64,
    /// Quota written by login.
    pub unlimited_draws: i64,
    /// Pause between starting and dealing.
    pub loading_delay: Duration,
    /// Storage key of the quota.
    pub quota_key: String,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            slot_count: 3,
            initial_draws: 3,
            unlimited_draws: 999,
            loading_delay: Duration::from_millis(1500),
            quota_key: "tarot_remaining_draws".to_string(),
        }
    }
}

/// Errors surfaced by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Dealing failed; the session went back to idle with its quota intact.
    #[error("failed to draw cards: {0}")]
    DrawFailed(#[from] DrawError),
}

/// Result of asking to start a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Cards will be dealt once the loading delay elapses.
    Loading,
    /// No quota left; the login prompt is now showing.
    LoginRequired,
    /// A reading is already dealt or being dealt.
    Ignored,
}

/// Result of flipping a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// The slot turned face up and others remain face down.
    Flipped,
    /// The slot turned face up and completed the reading.
    Completed,
    /// The slot was already face up.
    AlreadyFlipped,
    /// No dealt reading, still loading, or unknown slot.
    Ignored,
}

/// State machine driving a single reading.
///
/// Idle → Loading → Active → Complete → Idle. Starting without quota shows
/// the login prompt instead of dealing. Every command publishes a fresh
/// [`SessionState`] to subscribers.
pub struct GameSession {
    rules: GameRules,
    catalog: Arc<CardCatalog>,
    counter: PersistedCounter,
    rng: ChaCha8Rng,
    state: SessionState,
    publisher: watch::Sender<SessionState>,
}

impl GameSession {
    /// Create an idle session drawing from `catalog` and charging `counter`.
    pub fn new(rules: GameRules, catalog: Arc<CardCatalog>, counter: PersistedCounter) -> Self {
        let state = SessionState::new(rules.slot_count, counter.get());
        let (publisher, _) = watch::channel(state.clone());
        Self {
            rules,
            catalog,
            counter,
            rng: ChaCha8Rng::from_entropy(),
            state,
            publisher,
        }
    }

    /// Use a fixed seed so readings are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Rules this session was built with.
    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Catalog cards are drawn from.
    pub fn catalog(&self) -> &Arc<CardCatalog> {
        &self.catalog
    }

    /// Current snapshot.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Remaining free draws.
    pub fn remaining_draws(&self) -> i64 {
        self.counter.get()
    }

    /// Quota counter backing this session.
    pub fn counter(&self) -> &PersistedCounter {
        &self.counter
    }

    /// Mutable access to the quota counter, e.g. to start watching it.
    pub fn counter_mut(&mut self) -> &mut PersistedCounter {
        &mut self.counter
    }

    /// Receive a snapshot after every command.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.publisher.subscribe()
    }

    /// Start a reading: check the quota and enter the loading phase.
    ///
    /// Only valid from idle. With no quota left the login prompt is shown
    /// and nothing is dealt.
    pub fn begin_draw(&mut self) -> StartOutcome {
        self.state.notice = None;
        if self.state.loading || self.state.started {
            debug!(phase = ?self.phase(), "start ignored; reading already in progress");
            self.publish();
            return StartOutcome::Ignored;
        }

        let remaining = self.counter.get();
        if remaining <= 0 {
            info!("no free draws left; asking for login");
            self.state.login_prompt_visible = true;
            self.publish();
            return StartOutcome::LoginRequired;
        }

        self.state.login_prompt_visible = false;
        self.state.loading = true;
        debug!(remaining, "dealing cards");
        self.publish();
        StartOutcome::Loading
    }

    /// Deal the cards of a reading started with [`GameSession::begin_draw`].
    ///
    /// Returns `Ok(false)` when no deal was pending. On failure the session
    /// returns to idle, a notice is set and the quota is left untouched.
    pub fn finish_draw(&mut self) -> Result<bool, SessionError> {
        if !self.state.loading {
            debug!(phase = ?self.phase(), "deal ignored; nothing pending");
            return Ok(false);
        }
        self.state.loading = false;

        match self.catalog.draw(self.rules.slot_count, &mut self.rng) {
            Ok(cards) => {
                let names: Vec<&str> = cards.iter().map(|card| card.name.as_str()).collect();
                info!(cards = ?names, "cards dealt");
                self.state.deal(cards);
                let remaining = self.counter.update(|remaining| remaining - 1);
                info!(remaining, "free draw consumed");
                self.publish();
                Ok(true)
            }
            Err(err) => {
                error!(?err, "dealing failed");
                self.state.clear_slots();
                self.state.notice = Some(DRAW_FAILED_NOTICE.to_string());
                self.publish();
                Err(err.into())
            }
        }
    }

    /// Start a reading and deal it after the loading delay.
    pub async fn start_game(&mut self) -> Result<StartOutcome, SessionError> {
        let outcome = self.begin_draw();
        if outcome == StartOutcome::Loading {
            tokio::time::sleep(self.rules.loading_delay).await;
            self.finish_draw()?;
        }
        Ok(outcome)
    }

    /// Turn slot `slot_id` face up.
    pub fn flip_card(&mut self, slot_id: usize) -> FlipOutcome {
        if !self.state.started || self.state.loading {
            debug!(slot_id, phase = ?self.phase(), "flip ignored; no dealt reading");
            return FlipOutcome::Ignored;
        }
        if self.state.all_revealed() {
            debug!(slot_id, "flip ignored; reading complete");
            return FlipOutcome::Ignored;
        }
        let Some(slot) = self.state.slot_mut(slot_id) else {
            debug!(slot_id, "flip ignored; unknown slot");
            return FlipOutcome::Ignored;
        };
        if !slot.flip() {
            return FlipOutcome::AlreadyFlipped;
        }

        self.state.notice = None;
        debug!(slot_id, "card flipped");
        let outcome = if self.state.all_revealed() {
            info!("all cards revealed");
            FlipOutcome::Completed
        } else {
            FlipOutcome::Flipped
        };
        self.publish();
        outcome
    }

    /// Clear the reading, close the login prompt and return to idle. The
    /// quota is not touched.
    pub fn restart(&mut self) -> bool {
        if self.state.loading {
            debug!("restart ignored while dealing");
            return false;
        }
        self.state.clear_slots();
        self.state.login_prompt_visible = false;
        self.state.notice = None;
        info!("reading reset");
        self.publish();
        true
    }

    /// Simulated login: grant unlimited draws and close the prompt.
    pub fn login(&mut self) -> bool {
        if !self.state.login_prompt_visible {
            debug!("login ignored; prompt not showing");
            return false;
        }
        self.counter.set(self.rules.unlimited_draws);
        self.state.login_prompt_visible = false;
        self.state.notice = None;
        info!(remaining = self.rules.unlimited_draws, "logged in");
        self.publish();
        true
    }

    /// Close the login prompt without logging in.
    pub fn dismiss_login(&mut self) -> bool {
        if !self.state.login_prompt_visible {
            return false;
        }
        self.state.login_prompt_visible = false;
        debug!("login prompt dismissed");
        self.publish();
        true
    }

    /// Republish after the quota was changed by another view.
    pub fn sync_quota(&mut self) {
        if self.state.remaining_draws != self.counter.get() {
            self.publish();
        }
    }

    fn publish(&mut self) {
        self.state.remaining_draws = self.counter.get();
        self.publisher.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::store::FileStore;

    fn session_with(remaining: Option<i64>, rules: GameRules) -> Result<(TempDir, GameSession)> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path());
        if let Some(value) = remaining {
            store.try_write(&rules.quota_key, value)?;
        }
        let counter = PersistedCounter::open(store, rules.quota_key.clone(), rules.initial_draws);
        let session = GameSession::new(rules, CardCatalog::standard(), counter).with_seed(17);
        Ok((dir, session))
    }

    fn dealt_session() -> Result<(TempDir, GameSession)> {
        let (dir, mut session) = session_with(None, GameRules::default())?;
        assert_eq!(session.begin_draw(), StartOutcome::Loading);
        assert!(session.finish_draw()?);
        Ok((dir, session))
    }

    #[test]
    fn fresh_session_is_idle_and_empty() -> Result<()> {
        let (_dir, session) = session_with(None, GameRules::default())?;
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.remaining_draws(), 3);
        let slots = session.state().slots();
        assert_eq!(slots.len(), 3);
        assert_eq!(
            slots.iter().map(|slot| slot.id()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(slots.iter().all(|slot| slot.card().is_none() && !slot.is_flipped()));
        assert!(!session.state().all_revealed());
        Ok(())
    }

    #[test]
    fn dealing_fills_slots_and_charges_quota() -> Result<()> {
        let (_dir, session) = dealt_session()?;
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.remaining_draws(), 2);
        assert_eq!(session.state().remaining_draws(), 2);

        let ids: HashSet<u32> = session
            .state()
            .slots()
            .iter()
            .map(|slot| slot.card().expect("slot dealt").id)
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(session
            .state()
            .slots()
            .iter()
            .all(|slot| !slot.is_flipped() && !slot.is_selected()));
        Ok(())
    }

    #[test]
    fn second_start_while_loading_is_ignored() -> Result<()> {
        let (_dir, mut session) = session_with(None, GameRules::default())?;
        assert_eq!(session.begin_draw(), StartOutcome::Loading);
        assert_eq!(session.phase(), Phase::Loading);
        assert_eq!(session.begin_draw(), StartOutcome::Ignored);
        assert_eq!(session.flip_card(1), FlipOutcome::Ignored);
        assert!(!session.restart());

        assert!(session.finish_draw()?);
        assert!(!session.finish_draw()?);
        assert_eq!(session.remaining_draws(), 2);
        Ok(())
    }

    #[test]
    fn start_is_ignored_once_dealt() -> Result<()> {
        let (_dir, mut session) = dealt_session()?;
        let before = session.state().clone();
        assert_eq!(session.begin_draw(), StartOutcome::Ignored);
        assert_eq!(session.state(), &before);
        assert_eq!(session.remaining_draws(), 2);
        Ok(())
    }

    #[test]
    fn flip_is_idempotent() -> Result<()> {
        let (_dir, mut session) = dealt_session()?;
        assert_eq!(session.flip_card(2), FlipOutcome::Flipped);
        let once = session.state().clone();
        assert_eq!(session.flip_card(2), FlipOutcome::AlreadyFlipped);
        assert_eq!(session.state(), &once);

        let slot = &session.state().slots()[1];
        assert!(slot.is_flipped() && slot.is_selected());
        assert_eq!(session.state().revealed_cards().len(), 1);
        Ok(())
    }

    #[test]
    fn completes_only_after_every_flip() -> Result<()> {
        let (_dir, mut session) = dealt_session()?;
        assert_eq!(session.flip_card(3), FlipOutcome::Flipped);
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.flip_card(1), FlipOutcome::Flipped);
        assert!(!session.state().all_revealed());
        assert_eq!(session.flip_card(2), FlipOutcome::Completed);
        assert!(session.state().all_revealed());
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(session.flip_card(1), FlipOutcome::Ignored);
        Ok(())
    }

    #[test]
    fn flips_outside_a_reading_are_ignored() -> Result<()> {
        let (_dir, mut session) = session_with(None, GameRules::default())?;
        assert_eq!(session.flip_card(1), FlipOutcome::Ignored);
        assert_eq!(session.phase(), Phase::Idle);

        let (_dir, mut session) = dealt_session()?;
        assert_eq!(session.flip_card(0), FlipOutcome::Ignored);
        assert_eq!(session.flip_card(4), FlipOutcome::Ignored);
        Ok(())
    }

    #[test]
    fn restart_keeps_quota() -> Result<()> {
        let (_dir, mut session) = dealt_session()?;
        session.flip_card(1);
        assert!(session.restart());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.state().slots().iter().all(|slot| slot.card().is_none()));
        assert!(!session.state().is_started());
        assert_eq!(session.remaining_draws(), 2);
        Ok(())
    }

    #[test]
    fn exhausted_quota_shows_login_prompt() -> Result<()> {
        let (_dir, mut session) = session_with(Some(0), GameRules::default())?;
        assert_eq!(session.begin_draw(), StartOutcome::LoginRequired);
        assert_eq!(session.phase(), Phase::QuotaExhausted);
        assert!(session.state().login_prompt_visible());
        assert!(!session.state().is_started());
        assert_eq!(session.remaining_draws(), 0);
        assert!(!session.finish_draw()?);

        assert!(session.dismiss_login());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.login());
        assert_eq!(session.remaining_draws(), 0);
        Ok(())
    }

    #[test]
    fn restart_closes_login_prompt() -> Result<()> {
        let (_dir, mut session) = session_with(Some(0), GameRules::default())?;
        assert_eq!(session.begin_draw(), StartOutcome::LoginRequired);
        assert!(session.restart());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.state().login_prompt_visible());
        assert!(!session.login());
        assert_eq!(session.remaining_draws(), 0);
        Ok(())
    }

    #[test]
    fn login_grants_unlimited_draws() -> Result<()> {
        let (_dir, mut session) = session_with(Some(0), GameRules::default())?;
        session.begin_draw();
        assert!(session.login());
        assert_eq!(session.remaining_draws(), 999);
        assert!(!session.state().login_prompt_visible());
        assert_eq!(session.phase(), Phase::Idle);

        assert_eq!(session.begin_draw(), StartOutcome::Loading);
        assert!(session.finish_draw()?);
        assert_eq!(session.remaining_draws(), 998);
        Ok(())
    }

    #[test]
    fn failed_deal_returns_to_idle_without_charge() -> Result<()> {
        let rules = GameRules {
            slot_count: 16,
            ..GameRules::default()
        };
        let (_dir, mut session) = session_with(None, rules)?;
        assert_eq!(session.begin_draw(), StartOutcome::Loading);
        let err = session.finish_draw().unwrap_err();
        assert!(matches!(
            err,
            SessionError::DrawFailed(DrawError::OutOfRange {
                requested: 16,
                available: 15
            })
        ));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.state().notice(), Some(DRAW_FAILED_NOTICE));
        assert_eq!(session.remaining_draws(), 3);

        session.restart();
        assert_eq!(session.state().notice(), None);
        Ok(())
    }

    #[test]
    fn subscribers_see_every_command() -> Result<()> {
        let (_dir, mut session) = session_with(None, GameRules::default())?;
        let mut updates = session.subscribe();
        assert_eq!(updates.borrow_and_update().phase(), Phase::Idle);

        session.begin_draw();
        assert!(updates.has_changed()?);
        assert_eq!(updates.borrow_and_update().phase(), Phase::Loading);

        session.finish_draw()?;
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.phase(), Phase::Active);
        assert_eq!(snapshot.remaining_draws(), 2);
        Ok(())
    }

    #[test]
    fn seeded_sessions_deal_identically() -> Result<()> {
        let (_a, mut first) = session_with(None, GameRules::default())?;
        let (_b, mut second) = session_with(None, GameRules::default())?;
        for session in [&mut first, &mut second] {
            session.begin_draw();
            session.finish_draw()?;
        }
        let ids = |session: &GameSession| -> Vec<u32> {
            session
                .state()
                .slots()
                .iter()
                .filter_map(|slot| slot.card().map(|card| card.id))
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn start_game_waits_out_the_delay() -> Result<()> {
        let (_dir, mut session) = session_with(None, GameRules::default())?;
        let started = tokio::time::Instant::now();
        assert_eq!(session.start_game().await?, StartOutcome::Loading);
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.remaining_draws(), 2);
        Ok(())
    }
}
