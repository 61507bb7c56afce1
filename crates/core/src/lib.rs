#![warn(clippy::all, missing_docs)]

//! Core logic of the tarot reading game.
//!
//! This crate hosts the card catalog, the fair shuffle, the persisted
//! free-draw quota and the session state machine used by the terminal UI
//! and any future frontends.

pub mod api;
pub mod catalog;
pub mod config;
pub mod models;
pub mod session;
pub mod shuffle;
pub mod store;

pub use catalog::{CardCatalog, CatalogStats};
pub use config::AppConfig;
pub use models::{format_remaining, Card, Element, Suit};
pub use session::{
    FlipOutcome, GameRules, GameSession, GameSlot, Phase, SessionState, StartOutcome,
};
pub use store::{CounterEvent, FileStore, PersistedCounter};
