use std::io::{self, Write};

use serde::Serialize;

use crate::app::{IngestOutcome, IngestState, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Json,
    PathOnly,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(result: &IngestOutcome, mode: OutputMode) -> io::Result<()> {
        match (mode, result) {
            (OutputMode::PathOnly, IngestOutcome::Routed(report)) => {
                let mut stdout = io::stdout();
                stdout.write_all(report.path.as_bytes())?;
                stdout.write_all(b"\n")
            }
            _ => Self::print_json(result),
        }
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the log so stdout stays machine-readable.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event
            .elapsed
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        match event.state {
            IngestState::Failed => tracing::error!(elapsed_ms, "{}", event.message),
            IngestState::Finished => tracing::info!(elapsed_ms, "{}", event.message),
            IngestState::Running => tracing::debug!(elapsed_ms, "{}", event.message),
        }
    }
}
