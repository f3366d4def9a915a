//! Training loop
//!
//! `AwaitingData -> Training -> ReportingPriorities -> AwaitingData`.
//! The loop owns the only [`Algorithm`] and publishes a fresh snapshot after
//! every step; everything else reads through the model handle.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::ReplayService;
use crate::domain::{Batch, PriorityUpdate, Sample, Transitions};
use crate::error::{LearnerError, Result};
use crate::model::{Algorithm, ModelPublisher, TrainOutcome};
use crate::services::actor_hub::{ActorHubHandle, RESET};

/// Called once, on the first non-empty batch
pub type EvaluationStarter = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingData,
    Training,
    ReportingPriorities,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingData => write!(f, "awaiting_data"),
            Phase::Training => write!(f, "training"),
            Phase::ReportingPriorities => write!(f, "reporting_priorities"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Replay buffer not warm yet; nothing trained
    NotReady,
    Trained { step: u64 },
}

/// Save the model every `every` steps into `dir`
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    pub dir: PathBuf,
    pub every: u64,
}

impl CheckpointPolicy {
    fn is_due(&self, step: u64) -> bool {
        self.every > 0 && step % self.every == 0
    }
}

pub struct TrainingLoop {
    replay: Arc<dyn ReplayService>,
    algorithm: Option<Box<dyn Algorithm>>,
    publisher: ModelPublisher,
    phase: Phase,
    evaluation: Option<EvaluationStarter>,
    checkpoint: Option<CheckpointPolicy>,
    hub: Option<ActorHubHandle>,
}

impl TrainingLoop {
    pub fn new(
        replay: Arc<dyn ReplayService>,
        algorithm: Box<dyn Algorithm>,
        publisher: ModelPublisher,
    ) -> Self {
        Self {
            replay,
            algorithm: Some(algorithm),
            publisher,
            phase: Phase::AwaitingData,
            evaluation: None,
            checkpoint: None,
            hub: None,
        }
    }

    pub fn with_evaluation(mut self, starter: EvaluationStarter) -> Self {
        self.evaluation = Some(starter);
        self
    }

    pub fn with_checkpoints(mut self, checkpoint: CheckpointPolicy) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Broadcast `"reset"` to actors after each checkpoint
    pub fn with_hub(mut self, hub: ActorHubHandle) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Clear stale replay data, then train forever
    pub async fn run(mut self) -> Result<()> {
        self.replay.clear().await?;
        info!("replay buffer cleared, waiting for data");
        loop {
            self.step().await?;
        }
    }

    /// One pass through the state machine
    pub async fn step(&mut self) -> Result<StepOutcome> {
        self.phase = Phase::AwaitingData;
        let batch = match self.replay.sample().await? {
            Sample::NotReady => return Ok(StepOutcome::NotReady),
            Sample::Ready(batch) => batch,
        };

        if let Some(start) = self.evaluation.take() {
            info!("first batch received, starting evaluation");
            start();
        }

        self.phase = Phase::Training;
        let Batch {
            transitions,
            is_weights,
            points,
        } = batch;
        let outcome = self.train(transitions, is_weights).await?;

        self.phase = Phase::ReportingPriorities;
        let update = PriorityUpdate::new(points, outcome.td_errors)?;
        self.replay.update(&update).await?;
        debug!(step = outcome.step, batch = update.len(), "training step done");

        if self.checkpoint.as_ref().is_some_and(|c| c.is_due(outcome.step)) {
            if let Some(hub) = &self.hub {
                reset_actors(hub).await;
            }
        }

        self.phase = Phase::AwaitingData;
        Ok(StepOutcome::Trained { step: outcome.step })
    }

    /// Train on the blocking pool, checkpoint if due, then publish
    async fn train(
        &mut self,
        transitions: Transitions,
        is_weights: Vec<f32>,
    ) -> Result<TrainOutcome> {
        let mut algorithm = self.algorithm.take().ok_or_else(|| {
            LearnerError::Internal("algorithm unavailable after an aborted step".into())
        })?;
        let checkpoint = self.checkpoint.clone();

        let (algorithm, result) = tokio::task::spawn_blocking(move || {
            let result = algorithm
                .train(&transitions, &is_weights)
                .and_then(|outcome| {
                    if let Some(checkpoint) = checkpoint.filter(|c| c.is_due(outcome.step)) {
                        algorithm.save_model(&checkpoint.dir, outcome.step)?;
                        info!(step = outcome.step, dir = %checkpoint.dir.display(), "model saved");
                    }
                    Ok(outcome)
                })
                .and_then(|outcome| Ok((outcome, algorithm.snapshot()?)));
            (algorithm, result)
        })
        .await?;
        self.algorithm = Some(algorithm);

        let (outcome, snapshot) = result?;
        self.publisher.publish(snapshot);
        Ok(outcome)
    }
}

async fn reset_actors(hub: &ActorHubHandle) {
    match hub.broadcast(RESET).await {
        Ok(reached) => info!(reached, "actors told to reset"),
        Err(e) => warn!(error = %e, "could not broadcast reset"),
    }
}
