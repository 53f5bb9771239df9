//! Repository configuration file support.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::error::{ErrorContext, RepositoryError, RepositoryResult};

/// Repository configuration from file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub repository: RepositorySettings,
}

/// Repository type settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
}

fn default_repo_type() -> String {
    "local".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repository: RepositorySettings {
                repo_type: default_repo_type(),
            },
        }
    }
}

impl RepositoryConfig {
    /// Load repository configuration from a TOML file.
    pub fn from_file(path: &Path) -> RepositoryResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| RepositoryError::ConfigurationError {
            message: format!("cannot read {}: {}", path.display(), e),
            context: ErrorContext::new("repo_config"),
        })?;
        toml::from_str(&content).map_err(|e| RepositoryError::ConfigurationError {
            message: format!("cannot parse {}: {}", path.display(), e),
            context: ErrorContext::new("repo_config"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_type_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[repository]\ntype = \"local\"").unwrap();
        let config = RepositoryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.repository.repo_type, "local");
    }

    #[test]
    fn default_is_local() {
        assert_eq!(RepositoryConfig::default().repository.repo_type, "local");
    }
}
