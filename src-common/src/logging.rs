//! Platform-specific directory resolution for logs and recorded data.

use directories::ProjectDirs;
use std::path::PathBuf;

const APP_NAME: &str = "blackbox";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/blackbox/logs` or `~/.local/state/blackbox/logs` |
/// | macOS | `~/Library/Logs/blackbox` |
/// | Windows | `%LOCALAPPDATA%\blackbox\blackbox\logs` |
///
/// Falls back to `<tmp>/blackbox/logs` when no home directory is known.
pub fn log_dir() -> PathBuf {
    let Some(base) = project_dirs() else {
        return std::env::temp_dir().join(APP_NAME).join("logs");
    };

    #[cfg(target_os = "linux")]
    {
        base.state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs")
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir is ~/Library/Application Support/blackbox; logs belong
        // under ~/Library/Logs/blackbox.
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        library.join("Logs").join(APP_NAME)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        base.data_local_dir().join("logs")
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Base name of the service's rolling log files
/// (e.g. `blackbox-service.log.2026-03-01`).
pub const SERVICE_LOG_FILE: &str = "blackbox-service.log";

/// Returns the directory that holds recorded data (chunks, outbox).
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|base| base.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

/// Default directory for recorded chunks.
pub fn default_chunk_dir() -> PathBuf {
    data_dir().join("chunks")
}

/// Default directory where finished evidence bundles are dropped.
pub fn default_outbox_dir() -> PathBuf {
    data_dir().join("outbox")
}

/// Path of the JSON configuration file.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|base| base.config_dir().join("config.json"))
}
