//! # Service Configuration
//!
//! Command-line flags with environment fallbacks, resolved once at startup
//! into an [`AppConfig`]. Anything malformed fails here rather than on the
//! first request that needs it.

use std::path::PathBuf;

use axum::http::HeaderValue;
use clap::{ArgAction, Parser};
use thiserror::Error;

use greentrace_core::{CoreError, RegistryError, RoleRegistry, WalletAddress, DEFAULT_NETWORK};

use crate::auth::SecretToken;

/// Raw command-line interface.
#[derive(Parser)]
#[command(name = "greentrace-api", version, about = "GreenTrace supply-chain traceability API")]
pub struct Cli {
    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared bearer secret required on every `/api` request when set.
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Postgres connection URL. In-memory only when absent.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Wallets provisioned with the admin role on first sight.
    #[arg(long, env = "GREENTRACE_ADMIN_WALLETS", value_delimiter = ',')]
    pub admin_wallets: Vec<String>,

    /// YAML file overriding the role capability table.
    #[arg(long, env = "GREENTRACE_ROLE_POLICY")]
    pub role_policy: Option<PathBuf>,

    /// Ledger network recorded when a request does not name one.
    #[arg(long, env = "GREENTRACE_DEFAULT_NETWORK", default_value = DEFAULT_NETWORK)]
    pub default_network: String,

    /// Allowed CORS origins. CORS is disabled when empty.
    #[arg(long, env = "GREENTRACE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "GREENTRACE_LOG_JSON", action = ArgAction::SetTrue)]
    pub log_json: bool,
}

/// Errors resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid admin wallet '{value}': {source}")]
    AdminWallet {
        value: String,
        #[source]
        source: CoreError,
    },

    #[error("invalid CORS origin '{0}'")]
    CorsOrigin(String),

    #[error("default network must be 1-50 characters")]
    DefaultNetwork,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Resolved service configuration.
///
/// Custom `Debug` redacts the auth token.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth_token: Option<SecretToken>,
    pub admin_wallets: Vec<WalletAddress>,
    pub default_network: String,
    pub cors_origins: Vec<HeaderValue>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_wallets", &self.admin_wallets)
            .field("default_network", &self.default_network)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            admin_wallets: Vec::new(),
            default_network: DEFAULT_NETWORK.to_string(),
            cors_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Whether `wallet` is provisioned as an admin.
    pub fn is_admin_wallet(&self, wallet: &WalletAddress) -> bool {
        self.admin_wallets.contains(wallet)
    }
}

impl Cli {
    /// Validate flags into an [`AppConfig`].
    pub fn to_config(&self) -> Result<AppConfig, ConfigError> {
        let admin_wallets = self
            .admin_wallets
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|w| {
                WalletAddress::parse(w).map_err(|source| ConfigError::AdminWallet {
                    value: w.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cors_origins = self
            .cors_origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(|o| HeaderValue::from_str(o).map_err(|_| ConfigError::CorsOrigin(o.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let default_network = self.default_network.trim().to_string();
        if default_network.is_empty() || default_network.chars().count() > 50 {
            return Err(ConfigError::DefaultNetwork);
        }

        let auth_token = self
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(SecretToken::new);

        Ok(AppConfig {
            port: self.port,
            auth_token,
            admin_wallets,
            default_network,
            cors_origins,
        })
    }

    /// Load the role registry, from the policy file when one is named.
    pub fn load_registry(&self) -> Result<RoleRegistry, ConfigError> {
        match &self.role_policy {
            Some(path) => Ok(RoleRegistry::load(path)?),
            None => Ok(RoleRegistry::default()),
        }
    }
}
