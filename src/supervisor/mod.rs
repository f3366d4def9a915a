//! Supervisor for the learner's long-lived units
//!
//! Every unit is expected to run for the life of the process. The first one
//! to return, successfully or not, stops the supervisor and with it the
//! process; there is no restart or graceful shutdown.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::error::{LearnerError, Result};

type UnitResult = (&'static str, Result<()>);

/// Hands tasks spawned elsewhere to the supervisor
#[derive(Clone)]
pub struct UnitAdopter {
    tx: mpsc::UnboundedSender<(&'static str, JoinHandle<Result<()>>)>,
}

impl UnitAdopter {
    pub fn adopt(&self, name: &'static str, handle: JoinHandle<Result<()>>) -> Result<()> {
        self.tx
            .send((name, handle))
            .map_err(|_| LearnerError::Internal("supervisor adoption channel closed".into()))
    }
}

pub struct Supervisor {
    units: JoinSet<UnitResult>,
    adopt_tx: mpsc::UnboundedSender<(&'static str, JoinHandle<Result<()>>)>,
    adopt_rx: mpsc::UnboundedReceiver<(&'static str, JoinHandle<Result<()>>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (adopt_tx, adopt_rx) = mpsc::unbounded_channel();
        Self {
            units: JoinSet::new(),
            adopt_tx,
            adopt_rx,
        }
    }

    /// Start a named unit
    pub fn spawn<F>(&mut self, name: &'static str, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        info!(unit = name, "starting unit");
        self.units.spawn(async move { (name, unit.await) });
    }

    pub fn adopter(&self) -> UnitAdopter {
        UnitAdopter {
            tx: self.adopt_tx.clone(),
        }
    }

    /// Number of units currently supervised
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn watch(&mut self, name: &'static str, handle: JoinHandle<Result<()>>) {
        info!(unit = name, "adopting unit");
        self.units.spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(LearnerError::Task(e)),
            };
            (name, result)
        });
    }

    /// Block until the first unit stops; always returns an error
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                Some((name, handle)) = self.adopt_rx.recv() => self.watch(name, handle),
                Some(joined) = self.units.join_next() => {
                    return match joined {
                        Ok((unit, Ok(()))) => {
                            error!(unit, "unit exited");
                            Err(LearnerError::UnitExited { unit })
                        }
                        Ok((unit, Err(e))) => {
                            error!(unit, error = %e, "unit failed");
                            Err(e)
                        }
                        Err(e) => {
                            error!(error = %e, "unit panicked");
                            Err(LearnerError::Task(e))
                        }
                    };
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
