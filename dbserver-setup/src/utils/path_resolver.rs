use anyhow::Result;
use std::path::PathBuf;

const LOG_FOLDER_NAME: &str = "Setup_Log";
const SAMPLES_FOLDER_NAME: &str = "samples";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder the executable runs from
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Ok(cwd)
}

/// Resolve log folder (absolute path)
///
/// Walks up from the working directory looking for an existing `Setup_Log/`;
/// otherwise uses the per-user data directory, then the deployment folder.
pub fn resolve_log_folder() -> Result<PathBuf> {
    if let Ok(mut dir) = std::env::current_dir() {
        for _ in 0..12 {
            let candidate = dir.join(LOG_FOLDER_NAME);
            if candidate.is_dir() {
                return Ok(candidate);
            }

            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            } else {
                break;
            }
        }
    }

    let base = match dirs::data_local_dir() {
        Some(d) => d.join("dbserver-setup"),
        None => resolve_deployment_folder()?,
    };
    let log_dir = base.join(LOG_FOLDER_NAME);
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", log_dir, e))?;
    Ok(log_dir)
}

/// Default samples root: `<deployment>/samples`.
pub fn default_samples_root() -> PathBuf {
    resolve_deployment_folder()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(SAMPLES_FOLDER_NAME)
}
