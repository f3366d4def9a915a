//! Simulation environment seam used by the evaluation loop

pub mod ball_balance;

use std::collections::BTreeMap;

use crate::error::Result;

pub use ball_balance::BallBalance;

/// Reset parameters forwarded to the environment (`copy` = agent count)
pub type ResetConfig = BTreeMap<String, f64>;

/// Observation returned by `reset` and `step`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvStep {
    /// One observation vector per agent
    pub observations: Vec<Vec<f32>>,
    pub rewards: Vec<f32>,
    pub local_done: Vec<bool>,
    /// The whole environment must be reset before the next episode
    pub global_done: bool,
}

impl EnvStep {
    pub fn agent_count(&self) -> usize {
        self.observations.len()
    }
}

/// Blocking multi-agent environment
pub trait Environment: Send {
    fn state_dim(&self) -> usize;

    fn action_dim(&self) -> usize;

    fn reset(&mut self, config: &ResetConfig) -> Result<EnvStep>;

    fn step(&mut self, actions: &[Vec<f32>]) -> Result<EnvStep>;
}
