use crate::error::GameError;
use crate::model::card::Card;
use crate::model::hand::Hand;
use crate::model::rank::Rank;
use crate::model::suit::Suit;
use core::ops::Deref;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const N_CARDS_PER_DECK: usize = 52;

/// A shoe of `n_decks` standard decks with its own random source.
///
/// Reads go through [`Deref`] to the underlying [`Hand`]. Writes go through
/// the deck's own methods, which include the hand operations `add`, `remove`
/// and `remove_by_id`.
#[derive(Debug, Clone)]
pub struct Deck {
    hand: Hand,
    cut_cards: Hand,
    n_decks: Option<usize>,
    rng: StdRng,
}

impl Deck {
    /// Canonical, unshuffled deck with an entropy-seeded generator.
    pub fn new(n_decks: usize) -> Self {
        Self::with_rng(n_decks, StdRng::from_entropy())
    }

    pub fn with_seed(n_decks: usize, seed: u64) -> Self {
        Self::with_rng(n_decks, StdRng::seed_from_u64(seed))
    }

    pub fn with_optional_seed(n_decks: usize, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(n_decks, seed),
            None => Self::new(n_decks),
        }
    }

    pub fn with_rng(n_decks: usize, rng: StdRng) -> Self {
        let mut cards = Vec::with_capacity(n_decks * N_CARDS_PER_DECK);
        for _ in 0..n_decks {
            for rank in Rank::ORDERED.iter().copied() {
                for suit in Suit::ALL.iter().copied() {
                    cards.push(Card::new(rank, suit));
                }
            }
        }
        Self {
            hand: Hand::with_cards("deck", cards),
            cut_cards: Hand::new("cut"),
            n_decks: Some(n_decks),
            rng,
        }
    }

    /// Wraps an arbitrary hand, keeping its order.
    pub fn from_hand(hand: Hand, seed: u64) -> Self {
        Self {
            hand,
            cut_cards: Hand::new("cut"),
            n_decks: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn shuffle(&mut self) {
        self.hand.cards_mut().shuffle(&mut self.rng);
    }

    /// Removes the top `n` cards and returns them in dealing order.
    pub fn deal(&mut self, n: usize) -> Result<Vec<Card>, GameError> {
        self.ensure_available(n)?;
        Ok(self.hand.cards_mut().drain(..n).collect())
    }

    pub fn deal_one(&mut self) -> Result<Card, GameError> {
        self.hand
            .take_front()
            .ok_or(GameError::InsufficientCards {
                requested: 1,
                available: 0,
            })
    }

    /// Puts cards back at the bottom of the deck.
    pub fn add<I>(&mut self, cards: I)
    where
        I: IntoIterator<Item = Card>,
    {
        self.hand.add(cards);
    }

    pub fn remove(&mut self, cards: &[Card]) -> Result<(), GameError> {
        self.hand.remove(cards)
    }

    /// Burns specific cards wherever they sit. See [`Hand::remove_by_id`].
    pub fn remove_by_id<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), GameError> {
        self.hand.remove_by_id(ids)
    }

    /// Moves the bottom `n` cards into [`Deck::cut_cards`], ahead of anything
    /// cut earlier.
    pub fn cut(&mut self, n: usize) -> Result<(), GameError> {
        self.ensure_available(n)?;
        let split_at = self.hand.n_cards() - n;
        let mut suffix = self.hand.cards_mut().split_off(split_at);
        suffix.append(self.cut_cards.cards_mut());
        *self.cut_cards.cards_mut() = suffix;
        Ok(())
    }

    pub fn peek(&self) -> Option<&Card> {
        self.hand.cards().first()
    }

    /// Uniform draw from `[0, upper)` using the deck's generator.
    pub fn random_index(&mut self, upper: usize) -> Result<usize, GameError> {
        if upper == 0 {
            return Err(GameError::invalid_argument(
                "cannot draw from an empty range",
            ));
        }
        Ok(self.rng.gen_range(0..upper))
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn cut_cards(&self) -> &Hand {
        &self.cut_cards
    }

    pub fn hand(&self) -> &Hand {
        &self.hand
    }

    /// Number of standard decks this shoe was built from; `None` for decks
    /// wrapped around an arbitrary hand.
    pub fn n_decks(&self) -> Option<usize> {
        self.n_decks
    }

    fn ensure_available(&self, requested: usize) -> Result<(), GameError> {
        let available = self.hand.n_cards();
        if requested > available {
            return Err(GameError::InsufficientCards {
                requested,
                available,
            });
        }
        Ok(())
    }
}

impl Deref for Deck {
    type Target = Hand;

    fn deref(&self) -> &Hand {
        &self.hand
    }
}

#[cfg(test)]
mod tests {
    use super::{Deck, N_CARDS_PER_DECK};
    use crate::error::GameError;
    use crate::model::card::{Card, all_ids};
    use crate::model::hand::Hand;

    #[test]
    fn fresh_deck_is_in_canonical_order() {
        let deck = Deck::with_seed(1, 0);
        assert_eq!(deck.n_cards(), N_CARDS_PER_DECK);
        assert_eq!(
            deck.ids().collect::<Vec<_>>(),
            all_ids().collect::<Vec<_>>()
        );
    }

    #[test]
    fn same_seed_shuffles_identically() {
        let mut deck_a = Deck::with_seed(1, 0);
        let mut deck_b = Deck::with_seed(1, 0);
        let mut deck_c = Deck::with_seed(1, 1);
        deck_a.shuffle();
        deck_b.shuffle();
        deck_c.shuffle();
        assert_eq!(deck_a.cards(), deck_b.cards());
        assert_ne!(deck_a.cards(), deck_c.cards());
    }

    #[test]
    fn shuffle_preserves_multi_deck_composition() {
        let n_decks = 10;
        let mut deck = Deck::with_seed(n_decks, 7);
        deck.shuffle();
        assert_eq!(deck.n_cards(), n_decks * N_CARDS_PER_DECK);
        for id in all_ids() {
            assert_eq!(deck.count_id(&id), n_decks, "id {id}");
        }
    }

    #[test]
    fn deal_takes_from_the_top_in_order() {
        let mut deck = Deck::with_seed(1, 0);
        for (count, id) in all_ids().enumerate() {
            let dealt = deck.deal(1).unwrap();
            assert_eq!(dealt[0].id(), id);
            assert!(!deck.contains_id(&id));
            assert_eq!(deck.n_cards(), N_CARDS_PER_DECK - count - 1);
        }
        assert!(deck.is_empty());
    }

    #[test]
    fn deal_many_preserves_relative_order() {
        let mut deck = Deck::with_seed(2, 3);
        deck.shuffle();
        let before: Vec<String> = deck.ids().collect();
        let dealt = deck.deal(5).unwrap();
        let dealt_ids: Vec<String> = dealt.iter().map(|card| card.id()).collect();
        assert_eq!(dealt_ids, before[..5]);
        assert_eq!(deck.ids().collect::<Vec<_>>(), before[5..]);
    }

    #[test]
    fn over_deal_is_an_error_and_leaves_deck_untouched() {
        let mut deck = Deck::with_seed(1, 0);
        deck.deal(50).unwrap();
        let err = deck.deal(3).unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientCards {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(deck.n_cards(), 2);
        assert_eq!(deck.deal(2).unwrap().len(), 2);
        assert!(matches!(
            deck.deal_one(),
            Err(GameError::InsufficientCards { .. })
        ));
    }

    #[test]
    fn cut_moves_bottom_suffix() {
        let n_decks = 6;
        let cut_size = 10 * n_decks;
        let deck_ids: Vec<String> = (0..n_decks).flat_map(|_| all_ids()).collect();

        let mut deck = Deck::with_seed(n_decks, 0);
        deck.cut(cut_size).unwrap();

        let split = deck_ids.len() - cut_size;
        assert_eq!(deck.ids().collect::<Vec<_>>(), deck_ids[..split]);
        assert_eq!(deck.cut_cards().ids().collect::<Vec<_>>(), deck_ids[split..]);
    }

    #[test]
    fn single_deck_cut_of_ten_leaves_forty_two() {
        let ids: Vec<String> = all_ids().collect();
        let mut deck = Deck::with_seed(1, 0);
        deck.cut(10).unwrap();
        assert_eq!(deck.n_cards(), 42);
        assert_eq!(deck.ids().collect::<Vec<_>>(), ids[..42]);
        assert_eq!(deck.cut_cards().ids().collect::<Vec<_>>(), ids[42..]);
    }

    #[test]
    fn repeated_cuts_keep_deck_plus_cut_equal_to_original() {
        let original: Vec<String> = all_ids().collect();
        let mut deck = Deck::with_seed(1, 0);
        deck.cut(5).unwrap();
        deck.cut(7).unwrap();
        let rejoined: Vec<String> = deck.ids().chain(deck.cut_cards().ids()).collect();
        assert_eq!(rejoined, original);
        assert!(matches!(
            deck.cut(41),
            Err(GameError::InsufficientCards {
                requested: 41,
                available: 40
            })
        ));
    }

    #[test]
    fn random_index_stays_in_range() {
        let mut deck = Deck::with_seed(1, 11);
        for _ in 0..200 {
            assert!(deck.random_index(13).unwrap() < 13);
        }
        assert!(deck.random_index(0).is_err());
    }

    #[test]
    fn remove_by_id_burns_one_copy_per_call() {
        let mut deck = Deck::with_seed(2, 5);
        deck.shuffle();
        assert_eq!(deck.count_id("QS"), 2);
        deck.remove_by_id(&["QS"]).unwrap();
        assert_eq!(deck.count_id("QS"), 1);
        assert_eq!(deck.n_cards(), 2 * N_CARDS_PER_DECK - 1);
        deck.remove_by_id(&["QS"]).unwrap();
        assert_eq!(deck.count_id("QS"), 0);
        assert!(matches!(
            deck.remove_by_id(&["QS"]),
            Err(GameError::NotFound { .. })
        ));
        assert_eq!(deck.n_cards(), 2 * N_CARDS_PER_DECK - 2);
    }

    #[test]
    fn dealt_cards_can_be_returned_to_the_bottom() {
        let mut deck = Deck::with_seed(1, 0);
        let dealt = deck.deal(3).unwrap();
        deck.add(dealt.clone());
        assert_eq!(deck.n_cards(), N_CARDS_PER_DECK);
        assert_eq!(&deck.cards()[N_CARDS_PER_DECK - 3..], dealt.as_slice());

        let ace = Card::parse("AS").unwrap();
        deck.remove(&[ace]).unwrap();
        assert!(!deck.contains_id("AS"));
        assert_eq!(deck.n_cards(), N_CARDS_PER_DECK - 1);
    }

    #[test]
    fn large_shoe_deals_every_card_once() {
        let n_decks = 40;
        let mut deck = Deck::with_seed(n_decks, 9);
        deck.shuffle();
        let order: Vec<Card> = deck.cards().to_vec();
        let mut dealt = Vec::with_capacity(order.len());
        while let Ok(card) = deck.deal_one() {
            dealt.push(card);
            if dealt.len() == 700 {
                // Mixed front and bulk removal keeps the order intact.
                dealt.extend(deck.deal(5).unwrap());
            }
        }
        assert_eq!(dealt, order);
        assert!(matches!(
            deck.deal_one(),
            Err(GameError::InsufficientCards {
                requested: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn shoe_size_is_known_only_for_built_decks() {
        assert_eq!(Deck::with_seed(3, 0).n_decks(), Some(3));
        let wrapped = Deck::from_hand(Hand::from_ids("tail", ["AS", "KD"]).unwrap(), 0);
        assert_eq!(wrapped.n_decks(), None);
        assert_eq!(wrapped.n_cards(), 2);
    }
}
