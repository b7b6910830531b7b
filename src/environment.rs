//! Resolution of the runtime environment.
//!
//! The [`Environment`] is resolved once at startup and threaded into every
//! component that needs it. Missing information degrades to safe defaults:
//! no profile means `"default"`, a failed host lookup means an empty host
//! identifier, and neither is ever classified as production.

use crate::config::EnvironmentConfig;
use tracing::{debug, info, warn};

/// Name of the only environment whose calls pass through untouched.
pub const PRODUCTION: &str = "prod";

/// Name used when no profile is active.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Immutable description of where this process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    name: String,
    is_production: bool,
    local_consume_only: bool,
    host_id: String,
}

impl Environment {
    pub fn new(name: impl Into<String>, local_consume_only: bool, host_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            is_production: name == PRODUCTION,
            name,
            local_consume_only,
            host_id: host_id.into(),
        }
    }

    /// Resolves the environment from the active profile list and the raw
    /// local-consume-only flag.
    pub fn resolve(profiles: &[String], local_consume_only: &str, host_id: Option<&str>) -> Self {
        let name = profiles
            .first()
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_ENVIRONMENT);

        let host_id = match host_id {
            Some(id) => id.to_string(),
            None => lookup_host_name(),
        };

        let env = Self::new(name, local_consume_only.trim() == "1", host_id);
        info!(
            environment = %env.name,
            production = env.is_production,
            local_consume_only = env.local_consume_only,
            host = %env.host_id,
            "Resolved environment"
        );
        env
    }

    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self::resolve(
            &config.profiles,
            &config.local_consume_only,
            config.host_id.as_deref(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_production_env(&self) -> bool {
        self.is_production
    }

    pub fn is_local_consume_only(&self) -> bool {
        self.local_consume_only
    }

    pub fn host_identifier(&self) -> &str {
        &self.host_id
    }
}

/// Best-effort host name lookup, empty on failure.
pub fn lookup_host_name() -> String {
    match hostname::get().map(|name| name.into_string()) {
        Ok(Ok(name)) if !name.trim().is_empty() => {
            debug!(host = %name, "Host name resolved");
            name.trim().to_string()
        }
        Ok(Ok(_)) => {
            warn!("Host name is empty, using empty host identifier");
            String::new()
        }
        Ok(Err(raw)) => {
            warn!(host = ?raw, "Host name is not valid UTF-8, using empty host identifier");
            String::new()
        }
        Err(e) => {
            warn!("Host name lookup failed, using empty host identifier: {}", e);
            String::new()
        }
    }
}
