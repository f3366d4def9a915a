//! Linear actor-critic reference algorithm
//!
//! Deterministic actor `a = tanh(W s + b)` and critic `Q(s, a)` over the
//! concatenated `[s, a]`, each a single burn `Linear` layer. Training runs on
//! `Autodiff<NdArray>` with Adam: the critic regresses the importance-weighted
//! TD target, the actor ascends `Q(s, actor(s))`. Real deployments plug their
//! own [`Algorithm`] in through [`super::build_algorithm`].

use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module, Param};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor as BurnTensor;
use burn_ndarray::{NdArray, NdArrayDevice};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{AgentConfig, Algorithm, ModelDims, Policy, TrainOutcome};
use crate::domain::{PolicyVariables, Tensor, Transitions};
use crate::error::{LearnerError, Result};

/// Backend snapshots are evaluated on
type Inference = NdArray<f32>;
/// Backend the trainable networks live on
type Learner = Autodiff<Inference>;
type Adaptor<M> = OptimizerAdaptor<Adam<Inference>, M, Learner>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearHyperParams {
    pub gamma: f32,
    pub learning_rate: f64,
    pub init_scale: f32,
    pub seed: u64,
}

impl Default for LinearHyperParams {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            learning_rate: 3e-3,
            init_scale: 0.1,
            seed: 42,
        }
    }
}

impl LinearHyperParams {
    /// Read known keys from `agent_config`, ignoring the rest
    pub fn from_agent_config(config: &AgentConfig) -> Result<Self> {
        let mut params = Self::default();

        let number = |key: &str| -> Result<Option<f64>> {
            match config.get(key) {
                None => Ok(None),
                Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                    LearnerError::InvalidConfig(format!(
                        "agent_config.{} must be a number, got {}",
                        key, value
                    ))
                }),
            }
        };

        if let Some(gamma) = number("gamma")? {
            params.gamma = gamma as f32;
        }
        if let Some(lr) = number("learning_rate")? {
            params.learning_rate = lr;
        }
        if let Some(scale) = number("init_scale")? {
            params.init_scale = scale as f32;
        }
        if let Some(seed) = number("seed")? {
            params.seed = seed as u64;
        }

        if !(0.0..=1.0).contains(&params.gamma) {
            return Err(LearnerError::InvalidConfig(
                "agent_config.gamma must be within [0, 1]".to_string(),
            ));
        }
        if params.learning_rate <= 0.0 {
            return Err(LearnerError::InvalidConfig(
                "agent_config.learning_rate must be positive".to_string(),
            ));
        }

        Ok(params)
    }
}

#[derive(Module, Debug)]
pub struct Actor<B: Backend> {
    layer: Linear<B>,
}

impl<B: Backend> Actor<B> {
    pub fn forward(&self, state: BurnTensor<B, 2>) -> BurnTensor<B, 2> {
        self.layer.forward(state).tanh()
    }
}

#[derive(Module, Debug)]
pub struct Critic<B: Backend> {
    layer: Linear<B>,
}

impl<B: Backend> Critic<B> {
    /// One Q-value per row
    pub fn forward(&self, state: BurnTensor<B, 2>, action: BurnTensor<B, 2>) -> BurnTensor<B, 1> {
        let q: BurnTensor<B, 2> = self.layer.forward(BurnTensor::cat(vec![state, action], 1));
        q.squeeze(1)
    }
}

/// Column tensors of one batch
struct BatchTensors<B: Backend> {
    state: BurnTensor<B, 2>,
    action: BurnTensor<B, 2>,
    reward: BurnTensor<B, 1>,
    next_state: BurnTensor<B, 2>,
    done: BurnTensor<B, 1>,
}

impl<B: Backend> BatchTensors<B> {
    /// Caller must have run [`check_dims`]
    fn new(transitions: &Transitions, dims: ModelDims, device: &B::Device) -> Self {
        Self {
            state: matrix(&transitions.state, dims.state_dim, device),
            action: matrix(&transitions.action, dims.action_dim, device),
            reward: BurnTensor::from_floats(transitions.reward.as_slice(), device),
            next_state: matrix(&transitions.next_state, dims.state_dim, device),
            done: BurnTensor::from_floats(transitions.done.as_slice(), device),
        }
    }
}

fn matrix<B: Backend>(rows: &[Vec<f32>], width: usize, device: &B::Device) -> BurnTensor<B, 2> {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    BurnTensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), width])
}

fn to_vec<B: Backend, const D: usize>(tensor: BurnTensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| LearnerError::Algorithm(format!("tensor readback failed: {:?}", e)))
}

/// `r + gamma (1 - done) Q(s', actor(s')) - Q(s, a)`, target detached
fn signed_td<B: Backend>(
    actor: &Actor<B>,
    critic: &Critic<B>,
    batch: &BatchTensors<B>,
    gamma: f32,
) -> BurnTensor<B, 1> {
    let next_action = actor.forward(batch.next_state.clone());
    let bootstrap = critic.forward(batch.next_state.clone(), next_action);
    let not_done = batch.done.clone().neg().add_scalar(1.0);
    let target = batch.reward.clone() + (not_done * bootstrap).mul_scalar(gamma);
    target.detach() - critic.forward(batch.state.clone(), batch.action.clone())
}

fn check_dims(dims: ModelDims, transitions: &Transitions) -> Result<()> {
    transitions.validate()?;
    let bad_state = transitions
        .state
        .iter()
        .chain(&transitions.next_state)
        .any(|s| s.len() != dims.state_dim);
    let bad_action = transitions.action.iter().any(|a| a.len() != dims.action_dim);
    if bad_state || bad_action {
        return Err(LearnerError::Algorithm(format!(
            "transitions do not match model dims (state {}, action {})",
            dims.state_dim, dims.action_dim
        )));
    }
    Ok(())
}

/// Parameters of the linear model at one step
#[derive(Debug, Clone, Serialize)]
pub struct LinearPolicy {
    step: u64,
    #[serde(skip)]
    dims: ModelDims,
    #[serde(skip)]
    gamma: f32,
    /// Row-major `state_dim x action_dim`
    actor_weight: Vec<f32>,
    actor_bias: Vec<f32>,
    /// Row-major `(state_dim + action_dim) x 1`
    critic_weight: Vec<f32>,
    critic_bias: Vec<f32>,
}

impl LinearPolicy {
    fn export(
        step: u64,
        dims: ModelDims,
        gamma: f32,
        actor: &Actor<Inference>,
        critic: &Critic<Inference>,
    ) -> Result<Self> {
        let (actor_weight, actor_bias) = layer_values(&actor.layer)?;
        let (critic_weight, critic_bias) = layer_values(&critic.layer)?;
        Ok(Self {
            step,
            dims,
            gamma,
            actor_weight,
            actor_bias,
            critic_weight,
            critic_bias,
        })
    }

    /// Rebuild the networks on the inference backend
    fn networks(&self) -> (Actor<Inference>, Critic<Inference>) {
        let device = NdArrayDevice::default();
        let dims = self.dims;
        let actor = Actor {
            layer: load_layer(
                &self.actor_weight,
                &self.actor_bias,
                [dims.state_dim, dims.action_dim],
                &device,
            ),
        };
        let critic = Critic {
            layer: load_layer(
                &self.critic_weight,
                &self.critic_bias,
                [dims.state_dim + dims.action_dim, 1],
                &device,
            ),
        };
        (actor, critic)
    }
}

fn layer_values(layer: &Linear<Inference>) -> Result<(Vec<f32>, Vec<f32>)> {
    let weight = to_vec(layer.weight.val())?;
    let bias = match &layer.bias {
        Some(bias) => to_vec(bias.val())?,
        None => Vec::new(),
    };
    Ok((weight, bias))
}

fn load_layer(
    weight: &[f32],
    bias: &[f32],
    [d_input, d_output]: [usize; 2],
    device: &NdArrayDevice,
) -> Linear<Inference> {
    Linear {
        weight: Param::from_tensor(
            BurnTensor::<Inference, 1>::from_floats(weight, device).reshape([d_input, d_output]),
        ),
        bias: Some(Param::from_tensor(BurnTensor::from_floats(bias, device))),
    }
}

impl Policy for LinearPolicy {
    fn step(&self) -> u64 {
        self.step
    }

    fn variables(&self) -> PolicyVariables {
        let weight = Tensor::new(
            vec![self.dims.state_dim, self.dims.action_dim],
            self.actor_weight.clone(),
        )
        .unwrap_or_else(|_| Tensor::vector(self.actor_weight.clone()));
        PolicyVariables(vec![weight, Tensor::vector(self.actor_bias.clone())])
    }

    fn td_errors(&self, transitions: &Transitions) -> Result<Vec<f32>> {
        check_dims(self.dims, transitions)?;
        if transitions.is_empty() {
            return Ok(Vec::new());
        }
        let device = NdArrayDevice::default();
        let (actor, critic) = self.networks();
        let batch = BatchTensors::new(transitions, self.dims, &device);
        to_vec(signed_td(&actor, &critic, &batch, self.gamma).abs())
    }

    fn choose_actions(&self, states: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        if let Some(state) = states.iter().find(|s| s.len() != self.dims.state_dim) {
            return Err(LearnerError::Algorithm(format!(
                "observation of size {} does not match model state dim {}",
                state.len(),
                self.dims.state_dim
            )));
        }
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let device = NdArrayDevice::default();
        let (actor, _) = self.networks();
        let actions = to_vec(actor.forward(matrix(states, self.dims.state_dim, &device)))?;
        Ok(actions
            .chunks(self.dims.action_dim.max(1))
            .map(<[f32]>::to_vec)
            .collect())
    }
}

/// Trainable linear actor-critic
pub struct LinearActorCritic {
    actor: Actor<Learner>,
    critic: Critic<Learner>,
    actor_optim: Adaptor<Actor<Learner>>,
    critic_optim: Adaptor<Critic<Learner>>,
    dims: ModelDims,
    gamma: f32,
    learning_rate: f64,
    step: u64,
    device: NdArrayDevice,
}

impl LinearActorCritic {
    pub fn new(dims: ModelDims, hyper: LinearHyperParams) -> Self {
        let device = NdArrayDevice::default();
        Learner::seed(hyper.seed);

        let scale = f64::from(hyper.init_scale.abs().max(f32::EPSILON));
        let init = Initializer::Uniform {
            min: -scale,
            max: scale,
        };
        let actor = Actor {
            layer: LinearConfig::new(dims.state_dim, dims.action_dim)
                .with_initializer(init.clone())
                .init(&device),
        };
        let critic = Critic {
            layer: LinearConfig::new(dims.state_dim + dims.action_dim, 1)
                .with_initializer(init)
                .init(&device),
        };

        Self {
            actor,
            critic,
            actor_optim: AdamConfig::new().init(),
            critic_optim: AdamConfig::new().init(),
            dims,
            gamma: hyper.gamma,
            learning_rate: hyper.learning_rate,
            step: 0,
            device,
        }
    }

    fn export(&self) -> Result<LinearPolicy> {
        LinearPolicy::export(
            self.step,
            self.dims,
            self.gamma,
            &self.actor.valid(),
            &self.critic.valid(),
        )
    }
}

impl Algorithm for LinearActorCritic {
    fn train(&mut self, transitions: &Transitions, is_weights: &[f32]) -> Result<TrainOutcome> {
        check_dims(self.dims, transitions)?;
        let n = transitions.len();
        if is_weights.len() != n {
            return Err(LearnerError::LengthMismatch {
                what: "is_weights",
                expected: n,
                actual: is_weights.len(),
            });
        }

        let mut td_errors = Vec::new();
        if n > 0 {
            let batch = BatchTensors::<Learner>::new(transitions, self.dims, &self.device);
            let weights = BurnTensor::<Learner, 1>::from_floats(is_weights, &self.device);

            // Critic: importance-weighted squared TD-error
            let td = signed_td(&self.actor, &self.critic, &batch, self.gamma);
            td_errors = to_vec(td.clone().abs())?;
            let critic_loss = (td.clone() * td * weights).mean();
            let grads = GradientsParams::from_grads(critic_loss.backward(), &self.critic);
            self.critic = self
                .critic_optim
                .step(self.learning_rate, self.critic.clone(), grads);

            // Actor: ascend Q(s, actor(s))
            let action = self.actor.forward(batch.state.clone());
            let actor_loss = self.critic.forward(batch.state, action).mean().neg();
            let grads = GradientsParams::from_grads(actor_loss.backward(), &self.actor);
            self.actor = self
                .actor_optim
                .step(self.learning_rate, self.actor.clone(), grads);
        }

        self.step += 1;
        debug!(step = self.step, batch = n, "linear train step");

        Ok(TrainOutcome {
            step: self.step,
            td_errors,
        })
    }

    fn snapshot(&self) -> Result<Arc<dyn Policy>> {
        Ok(Arc::new(self.export()?))
    }

    fn save_model(&self, dir: &Path, step: u64) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("linear-{}.json", step));
        std::fs::write(&path, serde_json::to_vec_pretty(&self.export()?)?)?;
        Ok(())
    }
}
