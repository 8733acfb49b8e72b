//! Error handling and display for the uploader.

use std::path::PathBuf;

use colored::Colorize;
use thiserror::Error;

/// Uploader errors.
#[derive(Debug, Error)]
pub enum UploaderError {
    #[error(r#"missing or invalid action argument: must be one of "upload", "stage", or "sync""#)]
    InvalidAction,

    #[error("missing local-path argument")]
    MissingPath,

    #[error("local-path argument supplied, but no such file or directory: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("missing remote-target argument")]
    MissingTarget,

    #[error("invalid remote-target argument, {reason}: {target}")]
    InvalidTarget { target: String, reason: String },

    #[error("plugin {plugin} has not registered resource type {resource_type} at server {uri}")]
    UnknownResourceType {
        plugin: String,
        resource_type: String,
        uri: String,
    },

    #[error("plugin {plugin}, resource {resource_type} does not have a registered format")]
    MissingFormat { plugin: String, resource_type: String },

    #[error("unknown expected format from server: {0}")]
    UnknownFormat(String),

    #[error(
        "server resource registered as {format}, but local-path argument is not {expected}: {}",
        .path.display()
    )]
    FormatMismatch {
        format: String,
        expected: &'static str,
        path: PathBuf,
    },

    #[error("non-ok response code {status} from server at: {uri}")]
    Server { status: u16, uri: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl UploaderError {
    pub fn invalid_target(target: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(uploader_err) = err.downcast_ref::<UploaderError>() {
        match uploader_err {
            UploaderError::InvalidAction
            | UploaderError::MissingPath
            | UploaderError::MissingTarget => {
                eprintln!(
                    "\n{}",
                    "Hint: Run `data-uploader --help` for usage.".yellow()
                );
            }
            UploaderError::InvalidTarget { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Targets look like automatortypes/chef-solo/cookbooks/hadoop.".yellow()
                );
            }
            UploaderError::Server { status, .. } if *status == 401 || *status == 403 => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the --user and --tenant values.".yellow()
                );
            }
            UploaderError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check that the server is running and --uri points at it.".yellow()
                );
            }
            _ => {}
        }
    }
}
