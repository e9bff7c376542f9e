use log::debug;
use std::fmt::{Display, Formatter, Result as DisplayResult};
use std::fs::{rename, File};
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Result, TraceError};

/// Where the report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    /// `-` selects standard output, anything else is a file path.
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            Output::Stdout
        } else {
            Output::File(PathBuf::from(value))
        }
    }

    /// Fails early if the report could never be written to this destination.
    pub fn validate(&self) -> Result<()> {
        if let Output::File(path) = self {
            let dir = parent_dir(path);
            if !dir.is_dir() {
                return Err(TraceError::MissingOutputDir(dir.to_path_buf()));
            }
        }
        Ok(())
    }

    /// Writes `data` in one piece. Files are written to a temporary sibling
    /// and renamed into place, so readers see either nothing or everything.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        match self {
            Output::Stdout => {
                let mut out = stdout().lock();
                out.write_all(data)?;
                out.flush()?;
            }
            Output::File(path) => {
                let tmppath = parent_dir(path).join(format!(".{}.tmp", Uuid::new_v4()));
                debug!("Writing {} bytes to {:?}", data.len(), tmppath);
                let mut file = File::create(&tmppath)?;
                file.write_all(data)?;
                file.sync_all()?;
                drop(file);
                rename(&tmppath, path)?;
            }
        }
        Ok(())
    }
}

impl Display for Output {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        match self {
            Output::Stdout => write!(f, "<stdout>"),
            Output::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}
