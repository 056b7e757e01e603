mod game;
pub mod reward;
mod scores;
mod space;

pub use game::{EnvConfig, EpisodeState, GameEnv, InitialObservation, Step, StepInfo};
pub use scores::RankScores;
pub use space::{Discrete, Environment, Transition};
