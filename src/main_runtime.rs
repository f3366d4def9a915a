use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Console plus daily-rolling `learner.log` inside `log_dir`
pub fn init_logging(log_dir: &Path, level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},ds_learner=debug", level)));

    let console = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let file = match log_writer(log_dir) {
        Ok(writer) => Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Err(e) => {
            eprintln!(
                "file logging disabled, {} is not writable: {}",
                log_dir.display(),
                e
            );
            None
        }
    };
    let to_file = file.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    if to_file {
        info!(dir = %log_dir.display(), "writing learner.log");
    }
}

/// Non-blocking daily writer; `rolling::daily` panics on an unusable directory
fn log_writer(log_dir: &Path) -> std::io::Result<NonBlocking> {
    std::fs::create_dir_all(log_dir)?;
    let check = log_dir.join(".learner_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&check)?;
    std::fs::remove_file(&check)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "learner.log"));
    // Kept for the life of the process
    std::mem::forget(guard);
    Ok(writer)
}
