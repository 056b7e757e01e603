use crate::error::GameError;
use crate::model::card::Card;
use core::fmt;

/// Buffered prefix length that triggers compaction after front removals.
const COMPACT_AFTER: usize = 64;

/// A named, ordered collection of cards. Duplicate ids are legal and are
/// told apart by position.
#[derive(Clone, Default)]
pub struct Hand {
    name: String,
    cards: Vec<Card>,
    // Cards before `head` have been taken from the front and are no longer
    // part of the hand.
    head: usize,
}

impl Hand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cards: Vec::new(),
            head: 0,
        }
    }

    pub fn with_cards(name: impl Into<String>, cards: Vec<Card>) -> Self {
        Self {
            name: name.into(),
            cards,
            head: 0,
        }
    }

    /// Builds a hand from id tokens, failing on the first token that does not
    /// name a card.
    pub fn from_ids<I, S>(name: impl Into<String>, ids: I) -> Result<Self, GameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cards = ids
            .into_iter()
            .map(|id| Card::parse(id.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_cards(name, cards))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add<I>(&mut self, cards: I)
    where
        I: IntoIterator<Item = Card>,
    {
        self.cards.extend(cards);
    }

    /// Removes the first positional match for each card, in order. Nothing is
    /// removed unless every card can be matched.
    pub fn remove(&mut self, cards: &[Card]) -> Result<(), GameError> {
        let positions = self.resolve_positions(cards.iter().map(|card| {
            let card = *card;
            (move |candidate: &Card| *candidate == card, card.id())
        }))?;
        self.remove_positions(positions);
        Ok(())
    }

    /// Same as [`Hand::remove`] but matches canonical id tokens.
    pub fn remove_by_id<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), GameError> {
        let positions = self.resolve_positions(ids.iter().map(|id| {
            let id = id.as_ref();
            (move |candidate: &Card| candidate.matches_id(id), id.to_string())
        }))?;
        self.remove_positions(positions);
        Ok(())
    }

    /// Lazily yields the id of every card in current order. Each call starts over.
    pub fn ids(&self) -> impl Iterator<Item = String> + '_ {
        self.cards().iter().map(|card| card.id())
    }

    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.cards().iter().map(|card| card.name())
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.cards().iter().any(|card| card.matches_id(id))
    }

    pub fn count_id(&self, id: &str) -> usize {
        self.cards().iter().filter(|card| card.matches_id(id)).count()
    }

    pub fn n_cards(&self) -> usize {
        self.cards.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.n_cards() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards().iter()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards[self.head..]
    }

    pub(crate) fn cards_mut(&mut self) -> &mut Vec<Card> {
        self.compact();
        &mut self.cards
    }

    /// Takes the first card in amortized constant time.
    pub(crate) fn take_front(&mut self) -> Option<Card> {
        let card = *self.cards.get(self.head)?;
        self.head += 1;
        if self.head == self.cards.len() {
            self.cards.clear();
            self.head = 0;
        } else if self.head >= COMPACT_AFTER && self.head * 2 >= self.cards.len() {
            self.compact();
        }
        Some(card)
    }

    fn compact(&mut self) {
        if self.head > 0 {
            self.cards.drain(..self.head);
            self.head = 0;
        }
    }

    fn resolve_positions<I, F>(&self, matchers: I) -> Result<Vec<usize>, GameError>
    where
        I: IntoIterator<Item = (F, String)>,
        F: Fn(&Card) -> bool,
    {
        let cards = self.cards();
        let mut claimed = vec![false; cards.len()];
        let mut positions = Vec::new();
        for (matches, id) in matchers {
            let position = cards
                .iter()
                .enumerate()
                .position(|(idx, card)| !claimed[idx] && matches(card))
                .ok_or_else(|| GameError::NotFound {
                    id,
                    hand: self.name.clone(),
                })?;
            claimed[position] = true;
            positions.push(position);
        }
        Ok(positions)
    }

    fn remove_positions(&mut self, mut positions: Vec<usize>) {
        self.compact();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        for position in positions {
            self.cards.remove(position);
        }
    }
}

impl<'a> IntoIterator for &'a Hand {
    type Item = &'a Card;
    type IntoIter = std::slice::Iter<'a, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards().iter()
    }
}

impl PartialEq for Hand {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cards() == other.cards()
    }
}

impl Eq for Hand {}

impl fmt::Debug for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hand")
            .field("name", &self.name)
            .field("cards", &self.cards())
            .finish()
    }
}
