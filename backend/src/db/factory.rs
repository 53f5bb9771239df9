//! Repository factory for dependency injection.

use std::str::FromStr;
use std::sync::Arc;

use super::clock::SharedClock;
use super::error::{ErrorContext, RepositoryError, RepositoryResult};
use super::repo_config::RepositoryConfig;
use super::repositories::LocalRepository;
use super::repository::SharedRepository;

/// Repository type configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryType {
    /// In-memory local repository
    Local,
}

impl FromStr for RepositoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown repository type: {}", s)),
        }
    }
}

impl RepositoryType {
    /// Get repository type from the `REPOSITORY_TYPE` environment variable,
    /// defaulting to Local.
    pub fn from_env() -> Self {
        std::env::var("REPOSITORY_TYPE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::Local)
    }
}

/// Factory for creating repository instances.
pub struct RepositoryFactory;

impl RepositoryFactory {
    pub fn create_local(clock: SharedClock) -> SharedRepository {
        Arc::new(LocalRepository::new(clock))
    }

    /// Create a repository from file configuration.
    pub fn from_config(
        config: &RepositoryConfig,
        clock: SharedClock,
    ) -> RepositoryResult<SharedRepository> {
        let repo_type: RepositoryType =
            config
                .repository
                .repo_type
                .parse()
                .map_err(|e: String| RepositoryError::ConfigurationError {
                    message: e,
                    context: ErrorContext::new("repository_factory"),
                })?;
        match repo_type {
            RepositoryType::Local => Ok(Self::create_local(clock)),
        }
    }
}
