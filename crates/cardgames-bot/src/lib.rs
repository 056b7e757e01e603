pub mod policy;

pub use policy::{
    BaselineKind, ConstantPolicy, ExpectedObservationPolicy, MeanObservationPolicy, OraclePolicy,
    Policy, PolicyError, RandomPolicy, run_episode,
};
