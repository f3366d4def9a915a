//! Built-in ball balancing task.
//!
//! Each agent tilts a platform to keep a ball near its centre. State is
//! `[position, velocity, tilt]`, the single action is the tilt rate in
//! `[-1, 1]`. Every surviving step earns `0.1`; dropping the ball ends the
//! agent's episode with `-1`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{EnvStep, Environment, ResetConfig};
use crate::error::{LearnerError, Result};

const DT: f32 = 0.05;
const GRAVITY: f32 = 9.81;
const EDGE: f32 = 1.0;
const MAX_TILT: f32 = 0.4;

#[derive(Debug, Clone, Copy, Default)]
struct Ball {
    position: f32,
    velocity: f32,
    tilt: f32,
    done: bool,
}

impl Ball {
    fn observation(&self) -> Vec<f32> {
        vec![self.position, self.velocity, self.tilt]
    }
}

pub struct BallBalance {
    balls: Vec<Ball>,
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl BallBalance {
    pub fn new(max_steps: usize, seed: u64) -> Self {
        Self {
            balls: Vec::new(),
            steps: 0,
            max_steps: max_steps.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn snapshot(&self, rewards: Vec<f32>) -> EnvStep {
        EnvStep {
            observations: self.balls.iter().map(Ball::observation).collect(),
            rewards,
            local_done: self.balls.iter().map(|b| b.done).collect(),
            global_done: self.balls.iter().all(|b| b.done),
        }
    }
}

impl Environment for BallBalance {
    fn state_dim(&self) -> usize {
        3
    }

    fn action_dim(&self) -> usize {
        1
    }

    fn reset(&mut self, config: &ResetConfig) -> Result<EnvStep> {
        let copies = config.get("copy").copied().unwrap_or(1.0);
        if copies < 1.0 {
            return Err(LearnerError::Environment(format!(
                "reset_config.copy must be at least 1, got {}",
                copies
            )));
        }

        let rng = &mut self.rng;
        self.balls = (0..copies as usize)
            .map(|_| Ball {
                position: rng.gen_range(-0.3..0.3),
                velocity: 0.0,
                tilt: rng.gen_range(-0.05..0.05),
                done: false,
            })
            .collect();
        self.steps = 0;

        let n = self.balls.len();
        Ok(self.snapshot(vec![0.0; n]))
    }

    fn step(&mut self, actions: &[Vec<f32>]) -> Result<EnvStep> {
        if actions.len() != self.balls.len() {
            return Err(LearnerError::Environment(format!(
                "expected {} actions, got {}",
                self.balls.len(),
                actions.len()
            )));
        }

        self.steps += 1;
        let timeout = self.steps >= self.max_steps;

        let rewards = self
            .balls
            .iter_mut()
            .zip(actions)
            .map(|(ball, action)| {
                if ball.done {
                    return 0.0;
                }
                let rate = action.first().copied().unwrap_or(0.0).clamp(-1.0, 1.0);
                ball.tilt = (ball.tilt + rate * DT).clamp(-MAX_TILT, MAX_TILT);
                ball.velocity += GRAVITY * ball.tilt.sin() * DT;
                ball.position += ball.velocity * DT;

                if ball.position.abs() > EDGE {
                    ball.done = true;
                    -1.0
                } else {
                    ball.done = timeout;
                    0.1
                }
            })
            .collect();

        Ok(self.snapshot(rewards))
    }
}
