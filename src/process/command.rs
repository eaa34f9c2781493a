use crate::error::ProcessError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Resolve the encoder binary on `PATH`, or check an explicit path
pub fn resolve_binary(binary: &str) -> Result<PathBuf, ProcessError> {
    which::which(binary).map_err(|e| ProcessError::BinaryNotFound {
        binary: binary.to_string(),
        details: e.to_string(),
    })
}

/// Split the freeform argument string the wrapper was launched with
pub fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Fully rewritten encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl EncoderCommand {
    /// Insert `<flag> <channel>` right after the binary
    pub fn with_progress(program: PathBuf, flag: &str, channel: &Path, args: &str) -> Self {
        let mut full = vec![flag.to_string(), channel.to_string_lossy().into_owned()];
        full.extend(split_args(args));

        Self {
            program,
            args: full,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Space-joined command line for logs and status files
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Identifier derived from the `-i` inputs and the start time
///
/// Falls back to the wrapper pid when there are no inputs.
pub fn stream_id(args: &str, started_at: Option<DateTime<Local>>) -> String {
    let tokens = split_args(args);
    let mut id = String::new();

    for pair in tokens.windows(2) {
        if pair[0] == "-i" {
            id.push_str(&sanitize_input(&pair[1]));
        }
    }

    if id.is_empty() {
        return std::process::id().to_string();
    }

    if let Some(started_at) = started_at {
        id.push_str("__");
        id.push_str(&started_at.format("%Y_%m_%d__%H_%M_%S").to_string());
    }

    id
}

fn sanitize_input(input: &str) -> String {
    input
        .replace("://", "_")
        .replace('@', "")
        .replace([':', '/'], "_")
}
