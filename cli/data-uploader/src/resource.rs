//! Local resources and the payloads built from them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;

use crate::archive;
use crate::error::UploaderError;

/// Storage format the server registered for a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFormat {
    /// A directory, shipped as a gzip'd tarball.
    Archive,
    /// A single regular file.
    File,
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceFormat::Archive => write!(f, "archive"),
            ResourceFormat::File => write!(f, "file"),
        }
    }
}

impl FromStr for ResourceFormat {
    type Err = UploaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(ResourceFormat::Archive),
            "file" => Ok(ResourceFormat::File),
            other => Err(UploaderError::UnknownFormat(other.to_string())),
        }
    }
}

/// How a validated local path is turned into an upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Send the file bytes unchanged.
    Raw(PathBuf),
    /// Pack the directory into a tarball first.
    Directory(PathBuf),
}

impl Payload {
    /// Check `path` against the expected format.
    pub fn for_path(path: &Path, format: ResourceFormat) -> Result<Self, UploaderError> {
        match format {
            ResourceFormat::Archive if is_tarball(path) => Ok(Payload::Raw(path.to_path_buf())),
            ResourceFormat::Archive if path.is_dir() => Ok(Payload::Directory(path.to_path_buf())),
            ResourceFormat::Archive => Err(UploaderError::FormatMismatch {
                format: format.to_string(),
                expected: "a directory or .tgz archive",
                path: path.to_path_buf(),
            }),
            ResourceFormat::File if path.is_file() => Ok(Payload::Raw(path.to_path_buf())),
            ResourceFormat::File => Err(UploaderError::FormatMismatch {
                format: format.to_string(),
                expected: "a file",
                path: path.to_path_buf(),
            }),
        }
    }

    /// Produce the request body. Directory entries are prefixed with
    /// `resource_name`.
    pub fn into_body(self, resource_name: &str) -> Result<Vec<u8>, UploaderError> {
        let body = match self {
            Payload::Raw(path) => std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            Payload::Directory(path) => archive::pack_directory(&path, resource_name)?,
        };
        Ok(body)
    }
}

fn is_tarball(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    path.is_file() && (name.ends_with(".tgz") || name.ends_with(".tar.gz"))
}
