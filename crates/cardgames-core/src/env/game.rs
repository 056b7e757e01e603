use crate::env::reward;
use crate::env::scores::RankScores;
use crate::env::space::{Discrete, Environment, Transition};
use crate::error::GameError;
use crate::model::card::Card;
use crate::model::deck::Deck;
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

/// What `reset` reports before any card has been dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialObservation {
    /// Always bucket 0.
    #[default]
    Sentinel,
    /// Bucket of the top card, which stays in the deck.
    TopCard,
}

/// Guessing-game configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub n_decks: usize,
    pub rank_scores: RankScores,
    pub initial_observation: InitialObservation,
}

impl EnvConfig {
    pub fn new(n_decks: usize, rank_scores: RankScores) -> Self {
        Self {
            n_decks,
            rank_scores,
            initial_observation: InitialObservation::default(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new(1, RankScores::simple())
    }
}

/// Episode lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Uninitialized,
    Ready,
    Terminal,
}

/// Auxiliary step information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepInfo {
    /// Card dealt by the step; `None` after reset.
    pub card: Option<Card>,
    pub cards_remaining: usize,
}

pub type Step = Transition<usize, StepInfo>;

/// Single-player guessing game: each step the agent names a score bucket,
/// then one card is dealt and the guess is scored against its bucket. The
/// episode ends when the deck runs out.
#[derive(Debug, Clone)]
pub struct GameEnv {
    config: EnvConfig,
    deck: Deck,
    state: EpisodeState,
    last_card: Option<Card>,
    steps: usize,
}

impl GameEnv {
    pub fn new(config: EnvConfig) -> Result<Self, GameError> {
        if config.n_decks == 0 {
            return Err(GameError::invalid_argument("n_decks must be at least 1"));
        }
        Ok(Self {
            deck: Deck::new(config.n_decks),
            config,
            state: EpisodeState::Uninitialized,
            last_card: None,
            steps: 0,
        })
    }

    pub fn with_scores(n_decks: usize, rank_scores: RankScores) -> Result<Self, GameError> {
        Self::new(EnvConfig::new(n_decks, rank_scores))
    }

    /// Start a new episode over a freshly shuffled deck.
    pub fn reset(&mut self, seed: Option<u64>) -> (usize, StepInfo) {
        let mut deck = Deck::with_optional_seed(self.config.n_decks, seed);
        deck.shuffle();
        event!(
            target: "cardgames_core::env",
            Level::DEBUG,
            n_decks = self.config.n_decks,
            seed = ?seed,
            "episode reset"
        );
        self.reset_with_deck(deck)
    }

    /// Start a new episode over a caller-provided deck, dealt as-is.
    pub fn reset_with_deck(&mut self, deck: Deck) -> (usize, StepInfo) {
        self.deck = deck;
        self.last_card = None;
        self.steps = 0;
        self.state = if self.deck.is_empty() {
            EpisodeState::Terminal
        } else {
            EpisodeState::Ready
        };

        let observation = match self.config.initial_observation {
            InitialObservation::Sentinel => 0,
            InitialObservation::TopCard => self
                .deck
                .peek()
                .map_or(0, |card| self.config.rank_scores.score(card.rank)),
        };
        let info = StepInfo {
            card: None,
            cards_remaining: self.deck.n_cards(),
        };
        (observation, info)
    }

    /// Deal one card and score `action` against it.
    pub fn step(&mut self, action: usize) -> Result<Step, GameError> {
        match self.state {
            EpisodeState::Uninitialized => {
                return Err(GameError::invalid_state("step called before reset"));
            }
            EpisodeState::Terminal => {
                return Err(GameError::invalid_state(
                    "step called after the episode terminated",
                ));
            }
            EpisodeState::Ready => {}
        }
        if !self.action_space().contains(action) {
            return Err(GameError::invalid_argument(format!(
                "action {action} outside action space of size {}",
                self.action_space().n
            )));
        }

        let card = self.deck.deal_one()?;
        let observation = self.config.rank_scores.score(card.rank);
        let reward = self.reward(observation as f64, action as f64);
        let terminated = self.deck.is_empty();

        self.last_card = Some(card);
        self.steps += 1;
        if terminated {
            self.state = EpisodeState::Terminal;
        }

        event!(
            target: "cardgames_core::env",
            Level::TRACE,
            step = self.steps,
            card = %card,
            observation,
            action,
            reward,
            terminated
        );

        Ok(Transition {
            observation,
            reward,
            terminated,
            truncated: false,
            info: StepInfo {
                card: Some(card),
                cards_remaining: self.deck.n_cards(),
            },
        })
    }

    pub fn reward(&self, observation: f64, action: f64) -> f64 {
        reward::reward(observation, action, self.observation_space().n)
    }

    pub fn normalize_observation(&self, observation: f64) -> f64 {
        reward::normalize(observation, self.observation_space().n)
    }

    pub fn normalize_action(&self, action: f64) -> f64 {
        reward::normalize(action, self.action_space().n)
    }

    /// Print the most recently dealt card.
    pub fn render(&self) {
        event!(
            target: "cardgames_core::env",
            Level::INFO,
            card = ?self.last_card.map(Card::id),
            cards_remaining = self.deck.n_cards(),
            "render"
        );
        match self.last_card {
            Some(card) => println!(
                "Dealt {} ({} cards remaining)",
                card.name(),
                self.deck.n_cards()
            ),
            None => println!("No card dealt yet ({} cards in deck)", self.deck.n_cards()),
        }
    }

    /// End the current episode. `step` fails until the next reset.
    pub fn close(&mut self) {
        self.state = EpisodeState::Uninitialized;
        self.last_card = None;
    }

    pub fn action_space(&self) -> Discrete {
        Discrete::new(self.config.rank_scores.n_buckets())
    }

    pub fn observation_space(&self) -> Discrete {
        Discrete::new(self.config.rank_scores.n_buckets())
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn rank_scores(&self) -> &RankScores {
        &self.config.rank_scores
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub(crate) fn deck_mut(&mut self) -> &mut Deck {
        &mut self.deck
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn last_card(&self) -> Option<Card> {
        self.last_card
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Environment for GameEnv {
    type Observation = usize;
    type Action = usize;
    type Info = StepInfo;
    type Error = GameError;

    fn reset(&mut self, seed: Option<u64>) -> Result<(usize, StepInfo), GameError> {
        Ok(GameEnv::reset(self, seed))
    }

    fn step(&mut self, action: usize) -> Result<Step, GameError> {
        GameEnv::step(self, action)
    }

    fn action_space(&self) -> Discrete {
        GameEnv::action_space(self)
    }

    fn observation_space(&self) -> Discrete {
        GameEnv::observation_space(self)
    }

    fn render(&self) {
        GameEnv::render(self)
    }

    fn close(&mut self) {
        GameEnv::close(self)
    }
}
