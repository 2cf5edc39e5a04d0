//! Snapshot file backend.
//!
//! The whole snapshot is one JSON array. Every write replaces the file by
//! writing a sibling temporary and renaming it over the target.

use super::Backend;
use crate::error::Error;
use crate::metric::WireMetric;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// JSON array on local disk.
pub struct FileBackend {
    path: PathBuf,
    label: String,
}

impl FileBackend {
    /// A backend writing to `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> FileBackend {
        let path = path.as_ref().to_path_buf();
        FileBackend {
            label: format!("file:{}", path.display()),
            path,
        }
    }

    fn temporary(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn is_database(&self) -> bool {
        false
    }

    fn ensure_schema(&mut self) -> Result<(), Error> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(fs::create_dir_all(dir)?),
            _ => Ok(()),
        }
    }

    fn write_snapshot(&mut self, metrics: &[WireMetric]) -> Result<(), Error> {
        let encoded = serde_json::to_vec(metrics)
            .map_err(|e| Error::Internal(format!("encode snapshot: {}", e)))?;
        let tmp = self.temporary();
        {
            let mut fp = fs::File::create(&tmp)?;
            fp.write_all(&encoded)?;
            fp.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        trace!("wrote {} metrics to {}", metrics.len(), self.label);
        Ok(())
    }

    fn read_snapshot(&mut self) -> Result<Vec<WireMetric>, Error> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Internal(format!("corrupt snapshot {}: {}", self.label, e)))
    }

    fn probe(&mut self) -> Result<(), Error> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => Err(Error::Internal(
                format!("{} does not exist", dir.display()),
            )),
            _ => Ok(()),
        }
    }
}
