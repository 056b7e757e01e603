use crate::error::GameError;
use crate::model::rank::Rank;
use crate::model::suit::Suit;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// One playing card. Serialized as its id token (`"4H"`, `"10C"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub const fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }

    /// Parses a `RankSuit` token. Every character but the last names the rank,
    /// the last one names the suit. ASCII lowercase is folded to uppercase.
    pub fn parse(token: &str) -> Result<Self, GameError> {
        let invalid = || GameError::InvalidToken {
            token: token.to_string(),
        };

        let mut chars = token.chars();
        let suit_symbol = chars.next_back().ok_or_else(invalid)?;
        let rank_symbol = chars.as_str();
        if rank_symbol.is_empty() {
            return Err(invalid());
        }

        let rank = Rank::from_symbol(rank_symbol).ok_or_else(invalid)?;
        let suit = Suit::from_symbol(suit_symbol).ok_or_else(invalid)?;
        Ok(Self { rank, suit })
    }

    pub fn id(self) -> String {
        format!("{}{}", self.rank.symbol(), self.suit.symbol())
    }

    /// Human readable name, e.g. "Four of Hearts".
    pub fn name(self) -> String {
        format!("{} of {}", self.rank.name(), self.suit.name())
    }

    pub const fn rank_name(self) -> &'static str {
        self.rank.name()
    }

    pub const fn suit_name(self) -> &'static str {
        self.suit.name()
    }

    pub(crate) fn matches_id(self, id: &str) -> bool {
        let mut chars = id.chars();
        match chars.next_back() {
            Some(suit) => self.suit.symbol() == suit && self.rank.symbol() == chars.as_str(),
            None => false,
        }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank, self.suit)
    }
}

impl FromStr for Card {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Card::parse(s)
    }
}

impl TryFrom<String> for Card {
    type Error = GameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Card::parse(&value)
    }
}

impl From<Card> for String {
    fn from(card: Card) -> Self {
        card.id()
    }
}

/// Every canonical id in deck order: rank-major, suit-minor.
pub fn all_ids() -> impl Iterator<Item = String> {
    Rank::ORDERED.into_iter().flat_map(|rank| {
        Suit::ALL
            .into_iter()
            .map(move |suit| Card::new(rank, suit).id())
    })
}
