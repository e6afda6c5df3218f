//! Session persistence
//!
//! The backend's session is kept in a small JSON file so that a signed-in
//! user stays signed in across runs.

use std::path::{Path, PathBuf};

use crate::backend::Session;

use super::AuthError;

/// JSON file holding the current session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

/// Default session file location
pub fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("smart-bookmarks").join("session.json"))
        .unwrap_or_else(|| PathBuf::from("./.smart-bookmarks-session.json"))
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session; a missing file means no session
    pub fn load(&self) -> Result<Option<Session>, AuthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Io(e)),
        };

        let session = serde_json::from_str(&content).map_err(|e| AuthError::CorruptSession {
            path: self.path.clone(),
            error: e.to_string(),
        })?;
        Ok(Some(session))
    }

    /// Persist a session, replacing any previous one
    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| AuthError::CorruptSession {
                path: self.path.clone(),
                error: e.to_string(),
            })?;
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = ?self.path, "Session saved");
        Ok(())
    }

    /// Remove the stored session
    pub fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = ?self.path, "Session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Io(e)),
        }
    }
}
