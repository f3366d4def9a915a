use clap::Parser;
use std::path::PathBuf;

use crate::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "ds-learner")]
#[command(version = "0.1.0")]
#[command(about = "Distributed RL learner: replay-fed training, parameter server and actor hub", long_about = None)]
pub struct Cli {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Replay service host
    #[arg(long)]
    pub replay_host: Option<String>,

    /// Replay service port
    #[arg(long)]
    pub replay_port: Option<u16>,

    /// Parameter server port
    #[arg(long)]
    pub learner_port: Option<u16>,

    /// Actor hub port
    #[arg(long)]
    pub websocket_port: Option<u16>,

    /// Simulation build port
    #[arg(long)]
    pub build_port: Option<u16>,

    /// Run name, `{time}` expands to the start timestamp
    #[arg(short, long)]
    pub name: Option<String>,

    /// Algorithm to train
    #[arg(long)]
    pub algorithm: Option<String>,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            replay_host: self.replay_host.clone(),
            replay_port: self.replay_port,
            learner_port: self.learner_port,
            websocket_port: self.websocket_port,
            build_port: self.build_port,
            name: self.name.clone(),
            algorithm: self.algorithm.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::parse_from([
            "ds-learner",
            "-c",
            "config/ball.yaml",
            "--learner-port",
            "7001",
            "-n",
            "ball-{time}",
            "--build-port",
            "5005",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("config/ball.yaml")));

        let overrides = cli.overrides();
        assert_eq!(overrides.learner_port, Some(7001));
        assert_eq!(overrides.name.as_deref(), Some("ball-{time}"));
        assert_eq!(overrides.build_port, Some(5005));
        assert_eq!(overrides.replay_port, None);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["ds-learner", "--replay-port", "not-a-port"]).is_err());
    }
}
