#![deny(warnings)]
pub mod env;
pub mod error;
pub mod model;
pub mod sim;

pub use env::{
    Discrete, EnvConfig, Environment, EpisodeState, GameEnv, InitialObservation, RankScores, Step,
    StepInfo, Transition,
};
pub use error::GameError;
pub use model::card::Card;
pub use model::deck::Deck;
pub use model::hand::Hand;
pub use model::rank::Rank;
pub use model::suit::Suit;
pub use sim::GameSimulator;

pub struct AppInfo;

impl AppInfo {
    pub const fn name() -> &'static str {
        "cardgames"
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
