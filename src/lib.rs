pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod environment;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod services;
pub mod supervisor;
pub mod training;

pub use adapters::{ReplayClient, ReplayService, RetryPolicy};
pub use config::AppConfig;
pub use domain::{Batch, PolicyVariables, PriorityUpdate, Sample, Tensor, Transitions};
pub use error::{LearnerError, Result};
pub use evaluation::{EpisodeStats, EvaluationLoop};
pub use model::{model_handle, Algorithm, ModelPublisher, ModelReader, Policy};
pub use services::{ActorHub, ActorHubHandle, ParameterServer, ServerState};
pub use supervisor::Supervisor;
pub use training::{StepOutcome, TrainingLoop};
