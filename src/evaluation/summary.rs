//! Scalar summary sinks for evaluation statistics

use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::error::Result;

/// Destination for tagged scalar summaries
pub trait SummaryWriter: Send {
    fn scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emits summaries as tracing events
#[derive(Debug, Default)]
pub struct TracingSummaryWriter;

impl SummaryWriter for TracingSummaryWriter {
    fn scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()> {
        debug!(target: "summary", tag, value, step);
        Ok(())
    }
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    tag: &'a str,
    value: f32,
    step: u64,
    wall_time: String,
}

/// Appends one JSON object per scalar to a file
pub struct JsonlSummaryWriter {
    writer: BufWriter<File>,
}

impl JsonlSummaryWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl SummaryWriter for JsonlSummaryWriter {
    fn scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()> {
        let record = SummaryRecord {
            tag,
            value,
            step,
            wall_time: Utc::now().to_rfc3339(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Fan out to several writers
impl SummaryWriter for Vec<Box<dyn SummaryWriter>> {
    fn scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()> {
        for writer in self.iter_mut() {
            writer.scalar(tag, value, step)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.iter_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
