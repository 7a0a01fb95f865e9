//! JSON lines sample input

use anyhow::{Context, Result};
use cascade_lib::{MetricSample, SampleRecord};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Parse one input line; blank lines yield `None`
pub fn parse_line(line: &str) -> Option<Result<MetricSample, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str::<SampleRecord>(line).map(MetricSample::from))
}

/// Stream samples from a file, or stdin when no path is given
pub async fn read_samples(path: Option<PathBuf>, tx: mpsc::Sender<MetricSample>) -> Result<u64> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            info!(path = %path.display(), "Reading samples from file");
            forward_lines(BufReader::new(file), tx).await
        }
        None => {
            info!("Reading samples from stdin");
            forward_lines(BufReader::new(tokio::io::stdin()), tx).await
        }
    }
}

/// Send every well-formed line downstream; malformed lines are logged and skipped
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<MetricSample>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0u64;
    let mut forwarded = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_number += 1;
        match parse_line(&line) {
            None => continue,
            Some(Ok(sample)) => {
                if tx.send(sample).await.is_err() {
                    warn!("Pipeline input closed, stopping reader");
                    break;
                }
                forwarded += 1;
            }
            Some(Err(e)) => {
                warn!(line = line_number, error = %e, "Skipping malformed sample");
            }
        }
    }

    info!(samples = forwarded, lines = line_number, "Input exhausted");
    Ok(forwarded)
}
