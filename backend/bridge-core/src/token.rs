//! Where the `auth` token comes from.
//!
//! The daemon writes its bearer token to a file; a missing file is an expected
//! condition (the daemon may not have started yet), so reads yield `Option`
//! rather than an error.

use common::RedactedToken;

use std::path::PathBuf;

use log::{debug, trace};

pub trait TokenSource: Send + 'static {
    /// Current token, or `None` if absent or empty.
    fn read_token(&self) -> Option<RedactedToken>;

    /// Human-readable origin for diagnostics.
    fn describe(&self) -> String;
}

/// Reads the token file fresh on every authentication attempt.
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenSource for FileTokenSource {
    fn read_token(&self) -> Option<RedactedToken> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    debug!("Token file {} is empty", self.path.display());
                    None
                } else {
                    trace!("Read token from {}", self.path.display());
                    Some(RedactedToken::new(trimmed))
                }
            }
            Err(e) => {
                debug!("Token file {} unreadable: {e}", self.path.display());
                None
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A token handed over by the embedding process.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Option<RedactedToken>,
}

impl StaticTokenSource {
    pub fn new(token: Option<RedactedToken>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn read_token(&self) -> Option<RedactedToken> {
        self.token.clone()
    }

    fn describe(&self) -> String {
        "static token".to_string()
    }
}
