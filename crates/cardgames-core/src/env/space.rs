use rand::Rng;

/// A discrete space `{0, 1, …, n - 1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discrete {
    pub n: usize,
}

impl Discrete {
    pub const fn new(n: usize) -> Self {
        Self { n }
    }

    pub const fn contains(self, value: usize) -> bool {
        value < self.n
    }

    /// Panics on an empty space, like `gen_range` on an empty range.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> usize {
        rng.gen_range(0..self.n)
    }
}

/// Reset/step contract consumed by learning agents.
pub trait Environment {
    type Observation;
    type Action;
    type Info;
    type Error;

    fn reset(&mut self, seed: Option<u64>) -> Result<(Self::Observation, Self::Info), Self::Error>;

    fn step(
        &mut self,
        action: Self::Action,
    ) -> Result<Transition<Self::Observation, Self::Info>, Self::Error>;

    fn action_space(&self) -> Discrete;

    fn observation_space(&self) -> Discrete;

    fn render(&self) {}

    fn close(&mut self) {}
}

/// Result of one `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<O, I> {
    pub observation: O,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: I,
}
