//! External conversion tool invocation.
//!
//! The converter is deliberately narrow: run `tool [options…] <source>
//! <destination>`, wait for it, report. All failure modes (binary missing,
//! non-zero exit, exit zero without output) come back as a
//! [`ConvertError`]; nothing panics or escapes the call. The worker awaits
//! the call directly, so one hung tool stalls exactly one worker.

use crate::config::Settings;
use crate::error::ConvertError;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholder in tool options replaced by a fresh random token per call.
pub const RANDOM_TOKEN_PLACEHOLDER: &str = "RANDOMPASS";

/// Future returned by [`Converter::convert`].
pub type ConvertFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>>;

/// Turns one source file into one output file.
///
/// Implementations must leave no partial `destination` behind when they
/// return `Err`.
pub trait Converter: Send + Sync {
    fn convert<'a>(&'a self, source: &'a Path, destination: &'a Path) -> ConvertFuture<'a>;
}

/// Runs an external command such as `ps2pdf`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    tool: String,
    options: Option<String>,
}

impl CommandConverter {
    pub fn new(tool: impl Into<String>, options: Option<String>) -> Self {
        Self {
            tool: tool.into(),
            options,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.tool.clone(), settings.ps2pdf_opts.clone())
    }

    /// Tool arguments for one invocation, with the placeholder substituted.
    fn option_args(&self) -> Vec<String> {
        match self.options.as_deref() {
            Some(opts) if !opts.trim().is_empty() => {
                let opts = if opts.contains(RANDOM_TOKEN_PLACEHOLDER) {
                    opts.replace(RANDOM_TOKEN_PLACEHOLDER, &random_token())
                } else {
                    opts.to_string()
                };
                opts.split_whitespace().map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }

    async fn run(&self, source: &Path, destination: &Path) -> Result<(), ConvertError> {
        let args = self.option_args();
        debug!(
            "executing {} {} {} {}",
            self.tool,
            args.join(" "),
            source.display(),
            destination.display()
        );

        let output = Command::new(&self.tool)
            .args(&args)
            .arg(source)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConvertError::Launch {
                tool: self.tool.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ConvertError::ToolFailed {
                tool: self.tool.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return Err(ConvertError::ToolFailed {
                tool: self.tool.clone(),
                status: output.status.to_string(),
                stderr: format!("no output written to {}", destination.display()),
            });
        }

        info!(
            "converted file {} to {}",
            source.display(),
            destination.display()
        );
        Ok(())
    }
}

impl Converter for CommandConverter {
    fn convert<'a>(&'a self, source: &'a Path, destination: &'a Path) -> ConvertFuture<'a> {
        Box::pin(async move {
            let result = self.run(source, destination).await;
            if result.is_err() {
                discard_partial(destination).await;
            }
            result
        })
    }
}

/// Remove a leftover output file, ignoring "not found".
pub(crate) async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("cannot remove partial output {}: {}", path.display(), e),
    }
}

/// 12 upper-case hex characters from a fresh v4 UUID.
pub fn random_token() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    hex[..12].to_string()
}
