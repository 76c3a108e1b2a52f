//! Microphone recorder backed by an external capture command.
//!
//! The command (default `arecord ... -t wav -`) writes the clip to stdout and
//! runs until it is killed; `finish()` stops it and collects what it wrote.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::capabilities::{ActiveRecording, AudioClip, Recorder};
use crate::errors::CaptureError;

const DEFAULT_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Clone)]
pub struct CommandRecorder {
    program: String,
    args: Vec<String>,
    content_type: String,
}

impl CommandRecorder {
    /// Parse a shell-style command line.
    pub fn new(command: &str) -> Result<Self, CaptureError> {
        let mut parts = shlex::split(command)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CaptureError::Device(format!("invalid record command: {command}")))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| CaptureError::Device("empty record command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        })
    }

    /// Content type reported for clips (default `audio/wav`).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn device_error(&self, err: io::Error) -> CaptureError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{}: {err}", self.program))
            }
            _ => CaptureError::Device(format!("{}: {err}", self.program)),
        }
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn start(&self) -> Result<Box<dyn ActiveRecording>, CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.device_error(e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Device("recorder stdout unavailable".to_string()))?;
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        tracing::debug!(program = %self.program, "Recorder started");
        Ok(Box::new(CommandRecording {
            program: self.program.clone(),
            content_type: self.content_type.clone(),
            child,
            reader,
        }))
    }
}

struct CommandRecording {
    program: String,
    content_type: String,
    child: Child,
    reader: JoinHandle<io::Result<Vec<u8>>>,
}

#[async_trait]
impl ActiveRecording for CommandRecording {
    async fn finish(mut self: Box<Self>) -> Result<AudioClip, CaptureError> {
        let device = |e: io::Error| CaptureError::Device(e.to_string());

        match self.child.try_wait().map_err(device)? {
            // Exited before the window closed: either a finite source or a refused device.
            Some(status) if !status.success() => {
                return Err(CaptureError::Device(format!(
                    "{} exited with {status}",
                    self.program
                )));
            }
            Some(_) => {}
            None => {
                self.child.start_kill().map_err(device)?;
                let _ = self.child.wait().await;
            }
        }

        let bytes = (&mut self.reader)
            .await
            .map_err(|e| CaptureError::Device(format!("recorder output lost: {e}")))?
            .map_err(device)?;
        if bytes.is_empty() {
            return Err(CaptureError::Device(format!(
                "{} produced no audio",
                self.program
            )));
        }

        tracing::debug!(program = %self.program, bytes = bytes.len(), "Recorder stopped");
        Ok(AudioClip {
            bytes,
            content_type: self.content_type.clone(),
        })
    }
}

impl Drop for CommandRecording {
    fn drop(&mut self) {
        // The child itself is killed by `kill_on_drop`.
        self.reader.abort();
    }
}
