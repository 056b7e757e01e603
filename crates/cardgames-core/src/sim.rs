use crate::env::{EnvConfig, GameEnv};
use crate::error::GameError;

/// Batch helpers over a [`GameEnv`]: remaining-deck statistics and full
/// episode runs driven by a policy callback.
#[derive(Debug, Clone)]
pub struct GameSimulator {
    env: GameEnv,
}

impl GameSimulator {
    pub fn new(config: EnvConfig) -> Result<Self, GameError> {
        Ok(Self::from_env(GameEnv::new(config)?))
    }

    pub fn from_env(env: GameEnv) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &GameEnv {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut GameEnv {
        &mut self.env
    }

    pub fn into_env(self) -> GameEnv {
        self.env
    }

    pub fn n_actions(&self) -> usize {
        self.env.action_space().n
    }

    /// Uniform action drawn from the deck's generator.
    pub fn random_action(&mut self) -> usize {
        let space = self.env.action_space();
        space.sample(self.env.deck_mut().rng_mut())
    }

    /// Score bucket of every card still in the deck, top first.
    pub fn score_distribution(&self) -> Vec<usize> {
        let scores = self.env.rank_scores();
        self.env
            .deck()
            .iter()
            .map(|card| scores.score(card.rank))
            .collect()
    }

    pub fn observation_distribution(&self) -> Vec<usize> {
        self.score_distribution()
    }

    /// Number of remaining cards per bucket, indexed by bucket.
    pub fn remaining_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.env.observation_space().n];
        for bucket in self.score_distribution() {
            counts[bucket] += 1;
        }
        counts
    }

    /// Mean bucket of the remaining cards; `None` once the deck is empty.
    pub fn expected_observation(&self) -> Option<f64> {
        let distribution = self.score_distribution();
        if distribution.is_empty() {
            return None;
        }
        let total: usize = distribution.iter().sum();
        Some(total as f64 / distribution.len() as f64)
    }

    /// Mean over the configured buckets, ignoring what is left in the deck.
    pub fn mean_observation(&self) -> f64 {
        self.env.rank_scores().mean_bucket()
    }

    /// Plays one episode: reset, then ask `policy` for an action before every
    /// deal until the deck is exhausted. Returns the per-step rewards.
    pub fn simulate_run<F>(
        &mut self,
        mut policy: F,
        seed: Option<u64>,
    ) -> Result<Vec<f64>, GameError>
    where
        F: FnMut(&mut GameSimulator) -> usize,
    {
        self.try_simulate_run(|sim| Ok::<_, GameError>(policy(sim)), seed)
    }

    /// [`GameSimulator::simulate_run`] for policies that can fail.
    pub fn try_simulate_run<F, E>(
        &mut self,
        mut policy: F,
        seed: Option<u64>,
    ) -> Result<Vec<f64>, E>
    where
        F: FnMut(&mut GameSimulator) -> Result<usize, E>,
        E: From<GameError>,
    {
        self.env.reset(seed);
        let mut rewards = Vec::with_capacity(self.env.deck().n_cards());
        loop {
            let action = policy(self)?;
            let step = self.env.step(action)?;
            rewards.push(step.reward);
            if step.terminated {
                return Ok(rewards);
            }
        }
    }
}

impl From<GameEnv> for GameSimulator {
    fn from(env: GameEnv) -> Self {
        Self::from_env(env)
    }
}

#[cfg(test)]
mod tests {
    use super::GameSimulator;
    use crate::env::{EnvConfig, GameEnv, RankScores};
    use crate::error::GameError;
    use crate::model::deck::{Deck, N_CARDS_PER_DECK};
    use crate::model::hand::Hand;

    fn simulator(n_decks: usize) -> GameSimulator {
        GameSimulator::new(EnvConfig::new(n_decks, RankScores::simple())).unwrap()
    }

    #[test]
    fn distribution_matches_deck_order() {
        let mut sim = simulator(1);
        sim.env_mut().reset(Some(4));
        let manual: Vec<usize> = sim
            .env()
            .deck()
            .iter()
            .map(|card| sim.env().rank_scores().score(card.rank))
            .collect();
        assert_eq!(sim.observation_distribution(), manual);
        assert_eq!(sim.expected_observation(), Some(6.0));
        assert_eq!(sim.remaining_counts(), vec![4; 13]);
    }

    #[test]
    fn random_actions_stay_in_space() {
        let mut sim = simulator(1);
        sim.env_mut().reset(Some(8));
        for _ in 0..100 {
            assert!(sim.random_action() < 13);
        }
    }

    #[test]
    fn mean_observation_is_bucket_midpoint() {
        let sim = simulator(2);
        assert_eq!(sim.mean_observation(), 6.0);
    }

    #[test]
    fn expected_observation_tracks_remaining_cards() {
        let mut sim = simulator(1);
        let deck = Deck::from_hand(Hand::from_ids("one", ["8C"]).unwrap(), 0);
        sim.env_mut().reset_with_deck(deck);
        assert_eq!(sim.expected_observation(), Some(6.0));
        sim.env_mut().step(0).unwrap();
        assert_eq!(sim.expected_observation(), None);
    }

    #[test]
    fn midpoint_policy_matches_closed_form() {
        let mut sim = simulator(1);
        let midpoint = sim.mean_observation();
        let expected: f64 = (0..13)
            .map(|bucket| {
                let env = sim.env();
                let norm_score = env.normalize_action(bucket as f64);
                let norm_mid = env.normalize_observation(midpoint);
                4.0 * (1.0 - (norm_score - norm_mid).abs() / 2.0)
            })
            .sum();

        let rewards = sim
            .simulate_run(|s| s.mean_observation() as usize, Some(0))
            .unwrap();
        let total: f64 = rewards.iter().sum();
        assert!((total - expected).abs() < 1e-9, "{total} vs {expected}");
        assert!((total - 38.0).abs() < 1e-9);
    }

    #[test]
    fn episode_length_is_one_reward_per_card() {
        for n_decks in [1, 3] {
            let mut sim = simulator(n_decks);
            let rewards = sim.simulate_run(|s| s.random_action(), None).unwrap();
            assert_eq!(rewards.len(), n_decks * N_CARDS_PER_DECK);
            assert!(rewards.iter().all(|r| (0.0..=1.0).contains(r)));
        }
    }

    #[test]
    fn terminated_is_reported_once_on_the_last_step() {
        let mut env = GameEnv::with_scores(1, RankScores::simple()).unwrap();
        env.reset(Some(2));
        let mut flags = Vec::new();
        loop {
            let step = env.step(6).unwrap();
            flags.push(step.terminated);
            if step.terminated {
                break;
            }
        }
        assert_eq!(flags.len(), N_CARDS_PER_DECK);
        assert_eq!(flags.iter().filter(|t| **t).count(), 1);
        assert!(flags[N_CARDS_PER_DECK - 1]);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut a = simulator(1);
        let mut b = simulator(1);
        let run_a = a.simulate_run(|s| s.random_action(), Some(77)).unwrap();
        let run_b = b.simulate_run(|s| s.random_action(), Some(77)).unwrap();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn invalid_policy_action_aborts_the_run() {
        let mut sim = simulator(1);
        let err = sim.simulate_run(|_| 99, Some(1)).unwrap_err();
        assert!(matches!(err, GameError::InvalidArgument { .. }));
    }

    #[test]
    fn fallible_policy_errors_propagate() {
        #[derive(Debug)]
        enum Failure {
            Policy,
            Game,
        }
        impl From<GameError> for Failure {
            fn from(_: GameError) -> Self {
                Failure::Game
            }
        }

        let mut sim = simulator(1);
        let mut calls = 0;
        let err = sim
            .try_simulate_run(
                |_| {
                    calls += 1;
                    if calls > 3 { Err(Failure::Policy) } else { Ok(0) }
                },
                Some(1),
            )
            .unwrap_err();
        assert!(matches!(err, Failure::Policy));
        assert_eq!(sim.env().steps(), 3);
    }
}
