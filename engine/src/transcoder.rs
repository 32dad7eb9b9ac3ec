//! Thin subprocess wrapper around the external transcoder binary.
//!
//! Discards stdout to a null sink and keeps stderr for error reporting,
//! avoiding a filled-pipe-buffer deadlock if the child writes more to
//! stdout than a default pipe can hold before anyone reads it. No
//! wall-clock timeout is applied to extraction or concat; cancellation is
//! the operator's abort mechanism.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{PipelineError, Result};

const BINARY: &str = "ffmpeg";
const PROBE_BINARY: &str = "ffprobe";

pub struct Transcoder;

impl Transcoder {
    /// Extracts one fixed-duration, mono, 16 kHz chunk starting at `start_secs`.
    /// `-ss` precedes `-i` for fast, O(1) seeking.
    pub async fn extract_chunk(input: &Path, start_secs: u64, duration_secs: u64, output: &Path) -> Result<()> {
        let status = Command::new(BINARY)
            .arg("-ss")
            .arg(start_secs.to_string())
            .arg("-i")
            .arg(input)
            .arg("-t")
            .arg(duration_secs.to_string())
            .arg("-acodec")
            .arg("libmp3lame")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg("-q:a")
            .arg("2")
            .arg("-y")
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status_checked(BINARY)
            .await?;
        let _ = status;
        Ok(())
    }

    /// Concatenates the chunks listed in `concat_list` (ffconcat format) with
    /// a stream copy — no re-encode, to avoid generation loss and keep this
    /// fast across 5-20 chunks.
    pub async fn concat(concat_list: &Path, output: &Path) -> Result<()> {
        Command::new(BINARY)
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(concat_list)
            .arg("-c")
            .arg("copy")
            .arg("-y")
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status_checked(BINARY)
            .await?;
        Ok(())
    }

    /// Probes a file's duration in seconds.
    pub async fn probe_duration(path: &Path) -> Result<f64> {
        let output = Command::new(PROBE_BINARY)
            .arg("-v")
            .arg("quiet")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("csv=p=0")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::ExternalTool {
                tool: PROBE_BINARY.to_string(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(PipelineError::ExternalTool {
                tool: PROBE_BINARY.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| PipelineError::ExternalTool {
                tool: PROBE_BINARY.to_string(),
                detail: format!("unparseable duration: {e}"),
            })
    }

    /// Test-decodes the first few seconds of a chunk to catch files whose
    /// container metadata is correct but whose PCM stream is unreadable.
    /// A failing decode means the chunk must be discarded.
    pub async fn test_decode(path: &Path) -> Result<()> {
        let status = Command::new(BINARY)
            .arg("-v")
            .arg("error")
            .arg("-t")
            .arg("2")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("null")
            .arg("-")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status_checked(BINARY)
            .await;
        status.map(|_| ())
    }
}

#[async_trait::async_trait]
trait StatusChecked {
    async fn status_checked(&mut self, tool: &str) -> Result<std::process::ExitStatus>;
}

#[async_trait::async_trait]
impl StatusChecked for Command {
    async fn status_checked(&mut self, tool: &str) -> Result<std::process::ExitStatus> {
        let output = self.output().await.map_err(|e| PipelineError::ExternalTool {
            tool: tool.to_string(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(PipelineError::permanent(format!(
                "{tool} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.status)
    }
}
