use core::fmt;
use core::str::FromStr;

use super::{Policy, PolicyError};
use cardgames_core::GameSimulator;

/// Nearest action to a fractional bucket, halves rounded away from zero and
/// clamped into `[0, n_actions)`.
pub fn round_to_action(value: f64, n_actions: usize) -> usize {
    let upper = n_actions.saturating_sub(1);
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value.round() as usize).min(upper)
}

/// Scripted baselines selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineKind {
    Random,
    MeanObservation,
    ExpectedObservation,
    Constant(usize),
    Oracle,
}

impl BaselineKind {
    pub fn spawn(self) -> Box<dyn Policy> {
        match self {
            BaselineKind::Random => Box::new(RandomPolicy),
            BaselineKind::MeanObservation => Box::new(MeanObservationPolicy),
            BaselineKind::ExpectedObservation => Box::new(ExpectedObservationPolicy),
            BaselineKind::Constant(action) => Box::new(ConstantPolicy::new(action)),
            BaselineKind::Oracle => Box::new(OraclePolicy),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaselineKind::Random => "random",
            BaselineKind::MeanObservation => "mean_observation",
            BaselineKind::ExpectedObservation => "expected_observation",
            BaselineKind::Constant(_) => "constant",
            BaselineKind::Oracle => "oracle",
        }
    }
}

impl fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselineKind::Constant(action) => write!(f, "constant({action})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Parses the parameterless baselines; `constant` needs an explicit action.
impl FromStr for BaselineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(BaselineKind::Random),
            "mean" | "mean_observation" => Ok(BaselineKind::MeanObservation),
            "expected" | "expected_observation" => Ok(BaselineKind::ExpectedObservation),
            "oracle" => Ok(BaselineKind::Oracle),
            other => Err(format!("unknown baseline '{other}'")),
        }
    }
}

/// Uniform guesses from the deck's generator.
pub struct RandomPolicy;

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        Ok(sim.random_action())
    }
}

/// Always guesses the midpoint of the configured buckets.
pub struct MeanObservationPolicy;

impl Policy for MeanObservationPolicy {
    fn name(&self) -> &str {
        "mean_observation"
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        Ok(round_to_action(sim.mean_observation(), sim.n_actions()))
    }
}

/// Guesses the mean bucket of the cards still in the deck.
pub struct ExpectedObservationPolicy;

impl Policy for ExpectedObservationPolicy {
    fn name(&self) -> &str {
        "expected_observation"
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        let expected = sim
            .expected_observation()
            .unwrap_or_else(|| sim.mean_observation());
        Ok(round_to_action(expected, sim.n_actions()))
    }
}

pub struct ConstantPolicy {
    action: usize,
}

impl ConstantPolicy {
    pub fn new(action: usize) -> Self {
        Self { action }
    }
}

impl Policy for ConstantPolicy {
    fn name(&self) -> &str {
        "constant"
    }

    fn choose_action(&mut self, _sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        Ok(self.action)
    }
}

/// Reads the top card before it is dealt. Upper bound on achievable reward.
pub struct OraclePolicy;

impl Policy for OraclePolicy {
    fn name(&self) -> &str {
        "oracle"
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        let env = sim.env();
        let card = env.deck().peek().ok_or_else(|| PolicyError::Agent {
            agent: self.name().to_string(),
            message: "deck is empty".to_string(),
        })?;
        Ok(env.rank_scores().score(card.rank))
    }
}
