use std::path::Path;

use tracing::{info, warn};

pub fn is_production() -> bool {
    dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string()) == "production"
}

/// Layers `config/common.env`, the profile's file and `.secrets.env`, later
/// files overriding earlier ones. Missing files are skipped.
pub fn load_environment() -> anyhow::Result<Vec<&'static str>> {
    let env_files = if is_production() {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    };

    let mut loaded = Vec::new();
    for env_file in env_files {
        if load_env_file(env_file)? {
            loaded.push(env_file);
        }
    }

    Ok(loaded)
}

fn load_env_file(path: &str) -> anyhow::Result<bool> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(false);
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(true)
}
