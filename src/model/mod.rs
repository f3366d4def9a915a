//! Model strategy seam
//!
//! The learner never sees network internals. An [`Algorithm`] is the single
//! trainable object owned by the training loop; every training step yields an
//! immutable [`Policy`] snapshot that readers (parameter server, evaluation)
//! share through the [`ModelReader`] handle.

pub mod handle;
#[cfg(feature = "rl")]
pub mod linear;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::{PolicyVariables, Transitions};
use crate::error::{LearnerError, Result};

pub use handle::{model_handle, ModelPublisher, ModelReader};
#[cfg(feature = "rl")]
pub use linear::{LinearActorCritic, LinearHyperParams, LinearPolicy};

/// Free-form algorithm hyperparameters from the `agent_config` section
pub type AgentConfig = HashMap<String, serde_json::Value>;

/// Observation/action sizes the model is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub state_dim: usize,
    pub action_dim: usize,
}

/// Result of one training step
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    /// Training step count after this update
    pub step: u64,
    /// One TD-error per trained transition
    pub td_errors: Vec<f32>,
}

/// Read-only view of the model at one training step
pub trait Policy: Send + Sync {
    /// Training step this snapshot was taken at
    fn step(&self) -> u64;

    fn variables(&self) -> PolicyVariables;

    fn td_errors(&self, transitions: &Transitions) -> Result<Vec<f32>>;

    fn choose_actions(&self, states: &[Vec<f32>]) -> Result<Vec<Vec<f32>>>;
}

/// Trainable model, exclusively owned by the training loop
pub trait Algorithm: Send {
    fn train(&mut self, transitions: &Transitions, is_weights: &[f32]) -> Result<TrainOutcome>;

    /// Immutable copy of the current parameters
    fn snapshot(&self) -> Result<Arc<dyn Policy>>;

    /// Persist the model under `dir`. Format is up to the algorithm.
    fn save_model(&self, _dir: &Path, _step: u64) -> Result<()> {
        Ok(())
    }
}

/// Names accepted by [`build_algorithm`]
#[cfg(feature = "rl")]
pub const ALGORITHMS: &[&str] = &["linear"];
#[cfg(not(feature = "rl"))]
pub const ALGORITHMS: &[&str] = &[];

/// Build an algorithm by its configured name
#[cfg_attr(not(feature = "rl"), allow(unused_variables))]
pub fn build_algorithm(
    name: &str,
    dims: ModelDims,
    agent_config: &AgentConfig,
) -> Result<Box<dyn Algorithm>> {
    match name {
        #[cfg(feature = "rl")]
        "linear" => {
            let params = LinearHyperParams::from_agent_config(agent_config)?;
            Ok(Box::new(LinearActorCritic::new(dims, params)))
        }
        other => Err(LearnerError::InvalidConfig(format!(
            "unknown algorithm '{}' (available: {})",
            other,
            ALGORITHMS.join(", ")
        ))),
    }
}
