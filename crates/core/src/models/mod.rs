//! Shared domain models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the five suits of a tarot deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    /// Major arcana.
    Major,
    /// Swords.
    Swords,
    /// Cups.
    Cups,
    /// Wands.
    Wands,
    /// Pentacles.
    Pentacles,
}

impl Suit {
    /// Every suit in deck order.
    pub const ALL: [Suit; 5] = [
        Suit::Major,
        Suit::Swords,
        Suit::Cups,
        Suit::Wands,
        Suit::Pentacles,
    ];

    /// Canonical English label.
    pub fn label(self) -> &'static str {
        match self {
            Suit::Major => "Major Arcana",
            Suit::Swords => "Swords",
            Suit::Cups => "Cups",
            Suit::Wands => "Wands",
            Suit::Pentacles => "Pentacles",
        }
    }

    /// Localized (zh) label.
    pub fn localized_label(self) -> &'static str {
        match self {
            Suit::Major => "大牌",
            Suit::Swords => "寶劍",
            Suit::Cups => "聖杯",
            Suit::Wands => "權杖",
            Suit::Pentacles => "錢幣",
        }
    }

    /// Glyph shown next to the card name.
    pub fn icon(self) -> &'static str {
        match self {
            Suit::Major => "🔮",
            Suit::Swords => "⚔",
            Suit::Cups => "🍷",
            Suit::Wands => "🔥",
            Suit::Pentacles => "💰",
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Elemental association of the minor arcana.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    /// Fire.
    Fire,
    /// Water.
    Water,
    /// Earth.
    Earth,
    /// Air.
    Air,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Element::Fire => "fire",
            Element::Water => "water",
            Element::Earth => "earth",
            Element::Air => "air",
        };
        f.write_str(label)
    }
}

/// A single catalog card. Cards are defined once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Unique identifier within the catalog.
    pub id: u32,
    /// Canonical English name.
    pub name: String,
    /// Localized (zh) name.
    #[serde(alias = "chinese_name")]
    pub localized_name: String,
    /// Suit the card belongs to.
    pub suit: Suit,
    /// Ordinal within the suit.
    pub number: u32,
    /// Keyword tags.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Upright meaning.
    pub meaning_up: String,
    /// Reversed meaning.
    pub meaning_rev: String,
    /// Description of the artwork.
    pub description: String,
    /// Elemental tag, minor arcana only.
    #[serde(default)]
    pub element: Option<Element>,
    /// Artwork reference, resolved by the catalog.
    #[serde(default, alias = "imageUrl")]
    pub image_url: Option<String>,
}

impl Card {
    /// Returns a user-facing label combining both names.
    pub fn display_name(&self) -> String {
        if self.localized_name.is_empty() {
            self.name.clone()
        } else {
            format!("{} · {}", self.localized_name, self.name)
        }
    }
}

/// Render the remaining quota the way the presentation layer shows it.
pub fn format_remaining(remaining: i64) -> String {
    if remaining > 900 {
        "unlimited".to_string()
    } else if remaining <= 0 {
        "0".to_string()
    } else {
        remaining.to_string()
    }
}
