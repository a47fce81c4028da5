//! Config I/O: locating and reading session configuration documents.
//!
//! Documents are only ever read. Nothing here writes back to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::session::SessionConfig;
use crate::error::ConfigError;

// ============================================================================
// CONFIG PATH
// ============================================================================

/// Default location of the optional session document
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("realtime-car-demo").join("session.json"))
}

// ============================================================================
// CONFIG LOADING
// ============================================================================

/// Read and validate one document.
pub fn load_session_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    SessionConfig::parse(&data)
}

/// Resolve the config used at startup.
///
/// An explicitly requested file must load. The default file is optional: when
/// it is missing or broken the built-in defaults are used instead.
pub fn load_startup_config(explicit: Option<&Path>) -> Result<SessionConfig> {
    if let Some(path) = explicit {
        return load_session_config(path)
            .with_context(|| format!("loading session config from {}", path.display()));
    }

    let Some(path) = get_config_path() else {
        return Ok(SessionConfig::default());
    };
    if !path.exists() {
        return Ok(SessionConfig::default());
    }

    match load_session_config(&path) {
        Ok(config) => {
            tracing::info!("[Config] Loaded session config from {}", path.display());
            Ok(config)
        }
        Err(e) => {
            tracing::warn!(
                "[Config] Ignoring {} ({}), using defaults",
                path.display(),
                e
            );
            Ok(SessionConfig::default())
        }
    }
}
