use std::{
    io::ErrorKind,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{error::TranscodeError, format::AudioFormat};

/// Converts audio between delivery encodings.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn convert(
        &self,
        audio: Bytes,
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Bytes, TranscodeError>;
}

/// Transcoder backed by an external `ffmpeg` binary.
///
/// Input and output go through temporary files whose paths are passed as
/// separate arguments; nothing is ever interpolated into a shell command.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn codec_args(target: AudioFormat) -> &'static [&'static str] {
        match target {
            AudioFormat::Mp3 => &["-codec:a", "libmp3lame", "-qscale:a", "2", "-f", "mp3"],
            AudioFormat::Wav => &["-codec:a", "pcm_s16le", "-f", "wav"],
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(
        &self,
        audio: Bytes,
        source: AudioFormat,
        target: AudioFormat,
    ) -> Result<Bytes, TranscodeError> {
        let started_at = Instant::now();

        let input = tempfile::Builder::new()
            .prefix("tts-src-")
            .suffix(&format!(".{}", source.extension()))
            .tempfile()?;
        tokio::fs::write(input.path(), &audio).await?;

        let output = tempfile::Builder::new()
            .prefix("tts-dst-")
            .suffix(&format!(".{}", target.extension()))
            .tempfile()?;

        let child = Command::new(&self.program)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(input.path())
            .args(Self::codec_args(target))
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                warn!(
                    op = "transcode::convert",
                    result = "error",
                    error_code = "spawn",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to spawn transcoder"
                );
                if err.kind() == ErrorKind::NotFound {
                    TranscodeError::ToolMissing(err)
                } else {
                    TranscodeError::Io(err)
                }
            })?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TranscodeError::Timeout(self.timeout))??;

        if !result.status.success() {
            let exit_code = result.status.code();
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(TranscodeError::Tool { exit_code, stderr });
        }

        let converted = tokio::fs::read(output.path()).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                TranscodeError::EmptyOutput
            } else {
                TranscodeError::Io(err)
            }
        })?;
        if converted.is_empty() {
            return Err(TranscodeError::EmptyOutput);
        }

        info!(
            op = "transcode::convert",
            result = "ok",
            source = %source,
            target = %target,
            input_bytes = audio.len(),
            output_bytes = converted.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Audio transcoded"
        );
        Ok(Bytes::from(converted))
    }
}
