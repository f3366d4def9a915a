//! Policy evaluation loop
//!
//! Runs episodes against the environment with whatever snapshot the model
//! handle holds at each step and records reward statistics. Purely for
//! observability: it never touches the trainer and errors end the loop.

pub mod summary;

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::environment::{EnvStep, Environment, ResetConfig};
use crate::error::Result;
use crate::model::ModelReader;

pub use summary::{JsonlSummaryWriter, SummaryWriter, TracingSummaryWriter};

/// Aggregate reward statistics of one evaluation episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeStats {
    pub eval_step: u64,
    /// Cumulative reward per agent, ascending
    pub rewards: Vec<f32>,
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    /// Time since the loop started
    pub elapsed: Duration,
}

impl EpisodeStats {
    pub fn new(eval_step: u64, mut rewards: Vec<f32>, elapsed: Duration) -> Self {
        rewards.sort_by(|a, b| a.total_cmp(b));
        let (mean, min, max) = match (rewards.first(), rewards.last()) {
            (Some(min), Some(max)) => {
                let mean = rewards.iter().sum::<f32>() / rewards.len() as f32;
                (mean, *min, *max)
            }
            _ => (0.0, 0.0, 0.0),
        };
        Self {
            eval_step,
            rewards,
            mean,
            min,
            max,
            elapsed,
        }
    }

    /// `<eval_step>, <elapsed>min, rewards <sorted>`
    pub fn log_line(&self) -> String {
        let rewards = self
            .rewards
            .iter()
            .map(|r| format!("{:.1}", r))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}, {:.2}min, rewards {}",
            self.eval_step,
            self.elapsed.as_secs_f64() / 60.0,
            rewards
        )
    }
}

pub struct EvaluationLoop {
    env: Box<dyn Environment>,
    model: ModelReader,
    reset_config: ResetConfig,
    writer: Box<dyn SummaryWriter>,
    eval_step: u64,
    started_at: Instant,
    last: Option<EnvStep>,
}

impl EvaluationLoop {
    pub fn new(
        env: Box<dyn Environment>,
        model: ModelReader,
        reset_config: ResetConfig,
        writer: Box<dyn SummaryWriter>,
    ) -> Self {
        Self {
            env,
            model,
            reset_config,
            writer,
            eval_step: 0,
            started_at: Instant::now(),
            last: None,
        }
    }

    /// Play one episode until every agent reports done
    pub fn run_episode(&mut self) -> Result<EpisodeStats> {
        let start = match self.last.take() {
            Some(step) if !step.global_done => step,
            _ => self.env.reset(&self.reset_config)?,
        };

        let agents = start.agent_count();
        let mut rewards = vec![0.0f32; agents];
        let mut done = vec![false; agents];
        let mut states = start.observations;

        while done.iter().any(|d| !d) {
            let policy = self.model.current();
            let actions = policy.choose_actions(&states)?;
            let step = self.env.step(&actions)?;

            for i in 0..agents {
                if !done[i] {
                    rewards[i] += step.rewards.get(i).copied().unwrap_or(0.0);
                }
                done[i] = done[i] || step.local_done.get(i).copied().unwrap_or(true);
            }

            states = step.observations.clone();
            self.last = Some(step);
        }

        let stats = EpisodeStats::new(self.eval_step, rewards, self.started_at.elapsed());
        self.record(&stats)?;
        self.eval_step += 1;
        Ok(stats)
    }

    fn record(&mut self, stats: &EpisodeStats) -> Result<()> {
        self.writer.scalar("reward/mean", stats.mean, stats.eval_step)?;
        self.writer.scalar("reward/max", stats.max, stats.eval_step)?;
        self.writer.scalar("reward/min", stats.min, stats.eval_step)?;
        self.writer.flush()?;
        info!("{}", stats.log_line());
        Ok(())
    }

    pub fn run_episodes(&mut self, n: usize) -> Result<Vec<EpisodeStats>> {
        (0..n).map(|_| self.run_episode()).collect()
    }

    /// Evaluate forever; only returns on an environment or writer error
    pub fn run(mut self) -> Result<()> {
        debug!(model_step = self.model.step(), "evaluation loop started");
        loop {
            self.run_episode()?;
        }
    }
}
