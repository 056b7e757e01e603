mod baseline;

pub use baseline::{
    BaselineKind, ConstantPolicy, ExpectedObservationPolicy, MeanObservationPolicy, OraclePolicy,
    RandomPolicy, round_to_action,
};

use cardgames_core::{GameError, GameSimulator};
use thiserror::Error;
use tracing::{Level, event};

/// Failure while choosing an action
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("agent '{agent}' failed: {message}")]
    Agent { agent: String, message: String },
}

/// Unified interface for scripted and learned guessing policies
pub trait Policy: Send {
    fn name(&self) -> &str;

    /// Pick the bucket to guess for the next card. The simulator is handed
    /// over mutably so policies can draw from its generator.
    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError>;

    /// Optional: observe the reward sequence of a finished episode
    fn observe_episode(&mut self, _rewards: &[f64]) {}
}

impl<P: Policy + ?Sized> Policy for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        (**self).choose_action(sim)
    }

    fn observe_episode(&mut self, rewards: &[f64]) {
        (**self).observe_episode(rewards)
    }
}

/// Play one full episode with `policy` and report the per-step rewards.
pub fn run_episode<P>(
    sim: &mut GameSimulator,
    policy: &mut P,
    seed: Option<u64>,
) -> Result<Vec<f64>, PolicyError>
where
    P: Policy + ?Sized,
{
    let rewards = sim.try_simulate_run(|s| policy.choose_action(s), seed)?;
    policy.observe_episode(&rewards);

    event!(
        target: "cardgames_bot::policy",
        Level::DEBUG,
        policy = policy.name(),
        seed = ?seed,
        steps = rewards.len(),
        total_reward = rewards.iter().sum::<f64>(),
        "episode complete"
    );

    Ok(rewards)
}
