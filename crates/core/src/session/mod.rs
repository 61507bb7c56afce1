//! Reading session: slots, flags and the state machine driving them.

mod engine;
mod models;

pub use engine::{
    FlipOutcome, GameRules, GameSession, SessionError, StartOutcome, DRAW_FAILED_NOTICE,
};
pub use models::{GameSlot, Phase, SessionState};
