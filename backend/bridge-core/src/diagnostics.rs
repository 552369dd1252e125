//! Append-only diagnostics sink.
//!
//! Every state transition and protocol event is recorded here. Writing is best
//! effort: a failure to open or append never reaches the caller.

use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use humantime::format_rfc3339;
use log::info;

const RECORD_PREFIX: &str = "[bridge]";

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsLog {
    path: Option<PathBuf>,
}

impl DiagnosticsLog {
    /// Append records to `path`, creating parent directories on first write.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Mirror to `log` only.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{RECORD_PREFIX} {message}");

        if let Some(path) = &self.path {
            let line = format_line(SystemTime::now(), message);
            let _ = append(path, &line);
        }
    }
}

pub(crate) fn format_line(at: SystemTime, message: &str) -> String {
    format!("{RECORD_PREFIX} {} {message}\n", format_rfc3339(at))
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
