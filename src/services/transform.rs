//! External image-transform boundary.
//!
//! The pixel work itself is an external collaborator: the store only needs a
//! function that turns original bytes plus a level into transcoded bytes.
//! `CommandTransformer` is the production adapter: it pipes the image
//! through a configured external command, substituting the level's fixed
//! width/height/quality parameters into the argument list.

use crate::models::level::CompressionLevel;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform command failed: {0}")]
    Command(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A transcoded variant ready to be cached.
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Synchronous-from-the-caller's-perspective compression contract. No
/// partial results: either a complete variant or an error.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn compress(
        &self,
        bytes: &[u8],
        level: CompressionLevel,
    ) -> Result<TransformedImage, TransformError>;
}

/// Pipes image bytes through an external command.
///
/// The command line is split on whitespace; `{width}`, `{height}` and
/// `{quality}` placeholders in any argument are replaced with the level's
/// parameters. The command reads the original on stdin and writes a JPEG to
/// stdout; a non-zero exit is a transform failure.
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    /// Parse a configured command line. Returns `None` for an empty string,
    /// which disables derivation entirely.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    fn rendered_args(&self, level: CompressionLevel) -> Vec<String> {
        let params = level.params();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{width}", &params.width.to_string())
                    .replace("{height}", &params.height.to_string())
                    .replace("{quality}", &params.quality.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl ImageTransformer for CommandTransformer {
    async fn compress(
        &self,
        bytes: &[u8],
        level: CompressionLevel,
    ) -> Result<TransformedImage, TransformError> {
        let args = self.rendered_args(level);
        debug!(program = %self.program, level = %level, "invoking transform command");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransformError::Command("stdin unavailable".into()))?;
        let input = bytes.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        // surface a broken pipe from the writer only if the command also failed
        let write_result = writer.await.map_err(io::Error::other)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransformError::Command(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        write_result?;
        if output.stdout.is_empty() {
            return Err(TransformError::Command("empty output".into()));
        }

        Ok(TransformedImage {
            bytes: Bytes::from(output.stdout),
            mime_type: "image/jpeg".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_parsing_and_placeholders() {
        let t = CommandTransformer::from_command_line(
            "magick - -resize {width}x{height}> -quality {quality} jpeg:-",
        )
        .unwrap();
        assert_eq!(t.program, "magick");
        let args = t.rendered_args(CompressionLevel::Low);
        assert_eq!(args, vec!["-", "-resize", "720x720>", "-quality", "24", "jpeg:-"]);
        let args = t.rendered_args(CompressionLevel::High);
        assert!(args.contains(&"2160x2160>".to_string()));
        assert!(args.contains(&"84".to_string()));
    }

    #[test]
    fn empty_command_line_disables_transform() {
        assert!(CommandTransformer::from_command_line("").is_none());
        assert!(CommandTransformer::from_command_line("   ").is_none());
    }
}
