use chrono::Local;
use clap::Parser;
use ds_learner::adapters::ReplayClient;
use ds_learner::cli::Cli;
use ds_learner::config::AppConfig;
use ds_learner::environment::{BallBalance, Environment};
use ds_learner::error::Result;
use ds_learner::evaluation::{
    EvaluationLoop, JsonlSummaryWriter, SummaryWriter, TracingSummaryWriter,
};
use ds_learner::model::{build_algorithm, model_handle, ModelDims};
use ds_learner::services::{ActorHub, ParameterServer, ServerState};
use ds_learner::supervisor::Supervisor;
use ds_learner::training::{CheckpointPolicy, TrainingLoop};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?
        .with_overrides(&cli.overrides())
        .resolve_name(Local::now());
    config.ensure_valid()?;

    let run_dir = config.run_dir();
    main_runtime::init_logging(&run_dir, &config.logging.level, config.logging.json);

    let dump = config.dump()?;
    info!("{}", config.summary()?);
    info!(path = %dump.display(), "effective configuration saved");

    let dims = config.environment.dims();
    info!(
        state_dim = dims.state_dim,
        action_dim = dims.action_dim,
        build = config.environment.platform_build_path().unwrap_or("-"),
        build_port = ?config.environment.build_port,
        "model sized for the actors' environment"
    );
    let algorithm = build_algorithm(&config.algorithm, dims, &config.agent_config)?;
    let (publisher, reader) = model_handle(algorithm.snapshot()?);

    let hub = ActorHub::new();
    let replay = Arc::new(ReplayClient::new(&config.replay, config.retry.policy())?);
    info!(url = %replay.base_url(), "replay service");

    let mut supervisor = Supervisor::new();

    let mut training = TrainingLoop::new(replay, algorithm, publisher)
        .with_checkpoints(CheckpointPolicy {
            dir: run_dir.clone(),
            every: config.training.save_model_per_step,
        })
        .with_hub(hub.handle());

    let env = BallBalance::new(config.evaluation.max_episode_steps, rand::random());
    let env_dims = ModelDims {
        state_dim: env.state_dim(),
        action_dim: env.action_dim(),
    };
    if config.evaluation.enabled && env_dims != dims {
        warn!(
            ?env_dims,
            ?dims,
            "built-in evaluation environment does not match the model, evaluation disabled"
        );
    } else if config.evaluation.enabled {
        let evaluation = EvaluationLoop::new(
            Box::new(env),
            reader.clone(),
            config.reset_config.clone(),
            summary_writer(&run_dir)?,
        );
        let adopter = supervisor.adopter();
        training = training.with_evaluation(Box::new(move || {
            let handle = tokio::task::spawn_blocking(move || evaluation.run());
            if let Err(e) = adopter.adopt("evaluation", handle) {
                error!(error = %e, "could not supervise evaluation");
            }
        }));
    }

    let server = ParameterServer::new(ServerState::new(reader).with_hub(hub.handle()));
    let learner_addr = config.learner.addr();
    let websocket_addr = config.websocket.addr();

    supervisor.spawn("parameter_server", async move { server.run(&learner_addr).await });
    supervisor.spawn("actor_hub", async move { hub.run(&websocket_addr).await });
    supervisor.spawn("training", training.run());

    supervisor.run().await
}

fn summary_writer(run_dir: &Path) -> Result<Box<dyn SummaryWriter>> {
    let writers: Vec<Box<dyn SummaryWriter>> = vec![
        Box::new(TracingSummaryWriter),
        Box::new(JsonlSummaryWriter::create(&run_dir.join("summaries.jsonl"))?),
    ];
    Ok(Box::new(writers))
}
