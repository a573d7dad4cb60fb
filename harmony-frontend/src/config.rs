//! Frontend configuration
//!
//! Every option can be given on the command line or through the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::service::invoker::registry::MAX_TIMEOUT_SECS;

/// Frontend configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "harmony-frontend", about = "Geospatial request broker")]
pub struct Config {
    /// Postgres connection string. Jobs are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long, env = "FRONTEND_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Externally reachable root URL, used for backend callbacks and login redirects
    #[arg(long, env = "CALLBACK_URL_ROOT", default_value = "http://localhost:3000")]
    pub callback_url_root: String,

    /// Metadata catalog (CMR) base URL
    #[arg(long, env = "CMR_ENDPOINT", default_value = "https://cmr.earthdata.nasa.gov")]
    pub cmr_endpoint: String,

    /// Login provider base URL
    #[arg(long, env = "OAUTH_HOST", default_value = "https://urs.earthdata.nasa.gov")]
    pub oauth_host: String,

    #[arg(long, env = "OAUTH_CLIENT_ID", default_value = "harmony")]
    pub oauth_client_id: String,

    /// Header carrying the authenticated username, set by the auth proxy
    #[arg(long, env = "AUTH_USER_HEADER", default_value = "x-forwarded-user")]
    pub auth_user_header: String,

    /// JSON file describing backend services
    #[arg(long, env = "SERVICES_CONFIG")]
    pub services_config: Option<PathBuf>,

    /// Default time a backend gets to respond, in seconds
    #[arg(long, env = "SERVICE_TIMEOUT_SECS", default_value_t = 30)]
    pub service_timeout_secs: u64,

    /// Granules resolved when a request does not name one
    #[arg(long, env = "DEFAULT_GRANULE_LIMIT", default_value_t = 1)]
    pub default_granule_limit: u32,
}

impl Config {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("callback_url_root", &self.callback_url_root),
            ("cmr_endpoint", &self.cmr_endpoint),
            ("oauth_host", &self.oauth_host),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            if !value.starts_with("http://") && !value.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.auth_user_header.is_empty() {
            anyhow::bail!("auth_user_header cannot be empty");
        }

        if self.service_timeout_secs == 0 {
            anyhow::bail!("service_timeout_secs must be greater than 0");
        }
        if self.service_timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!("service_timeout_secs cannot exceed {}", MAX_TIMEOUT_SECS);
        }

        if self.default_granule_limit == 0 {
            anyhow::bail!("default_granule_limit must be greater than 0");
        }

        Ok(())
    }
}
