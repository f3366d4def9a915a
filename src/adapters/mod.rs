pub mod replay;

pub use replay::{ReplayClient, ReplayService, RetryPolicy};
