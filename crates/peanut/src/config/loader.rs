use std::path::{Component, Path};

use crate::config::schema::AgentConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses a config document without validating it; flags may still fill gaps.
pub fn load_config_from_str(content: &str) -> Result<AgentConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(AgentConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Checks the final configuration before anything starts.
pub fn validate_config(config: &AgentConfig) -> Result<(), ConfigError> {
    let repo = &config.repository;

    if repo.url.trim().is_empty() {
        return Err(ConfigError::validation("repository url is required"));
    }
    if repo.branch.trim().is_empty() {
        return Err(ConfigError::validation("repository branch is required"));
    }
    if repo.path.trim().is_empty() {
        return Err(ConfigError::validation("repository path is required"));
    }

    let escapes = Path::new(&repo.path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(ConfigError::validation(format!(
            "repository path '{}' must be relative and stay inside the repository",
            repo.path
        )));
    }

    if config.resync_interval == 0 {
        return Err(ConfigError::validation("resync interval must be greater than zero"));
    }
    if config.history_size == 0 {
        return Err(ConfigError::validation("history size must be greater than zero"));
    }
    if config.git_timeout_secs == 0 {
        return Err(ConfigError::validation("git timeout must be greater than zero"));
    }
    if config.engine_timeout_secs == Some(0) {
        return Err(ConfigError::validation("engine timeout must be greater than zero"));
    }
    if config.namespaced && config.namespace.trim().is_empty() {
        return Err(ConfigError::validation(
            "namespaced mode requires an explicit namespace",
        ));
    }

    Ok(())
}
