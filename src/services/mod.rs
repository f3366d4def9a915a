pub mod actor_hub;
pub mod parameter_server;

pub use actor_hub::{ActorHub, ActorHubHandle};
pub use parameter_server::{ParameterServer, ServerState, StatusResponse};
