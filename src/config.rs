use dotenv::dotenv;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

// Where schedule entries come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Csv(PathBuf),
    Remote(String),
}

/// Service settings read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub auth_secret: String,
    pub users_csv_path: PathBuf,
    pub selections_csv_path: PathBuf,
    pub catalog: CatalogSource,
    pub dependency_timeout: Duration,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub password_hash_cost: u32,
    pub log_level: String,
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let auth_secret = env::var("AUTH_SECRET").map_err(|_| ConfigError::Missing("AUTH_SECRET"))?;
        if auth_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                name: "AUTH_SECRET",
                value: "<redacted>".to_string(),
                reason: "must be at least 16 characters".to_string(),
            });
        }

        // A remote catalog takes precedence over the local CSV file
        let catalog = match env::var("CATALOG_URL") {
            Ok(url) if !url.trim().is_empty() => CatalogSource::Remote(url.trim().to_string()),
            _ => CatalogSource::Csv(
                env::var("CATALOG_CSV_PATH")
                    .unwrap_or_else(|_| "data/catalog.csv".to_string())
                    .into(),
            ),
        };

        let password_hash_cost = parse_var("PASSWORD_HASH_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&password_hash_cost) {
            return Err(ConfigError::Invalid {
                name: "PASSWORD_HASH_COST",
                value: password_hash_cost.to_string(),
                reason: "must be between 4 and 31".to_string(),
            });
        }

        let config = Self {
            bind_addr: parse_var("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            auth_secret,
            users_csv_path: env::var("USERS_CSV_PATH")
                .unwrap_or_else(|_| "data/users.csv".to_string())
                .into(),
            selections_csv_path: env::var("SELECTIONS_CSV_PATH")
                .unwrap_or_else(|_| "data/selections.csv".to_string())
                .into(),
            catalog,
            dependency_timeout: Duration::from_millis(parse_var("DEPENDENCY_TIMEOUT_MS", 5000u64)?),
            access_token_ttl_secs: parse_var("ACCESS_TOKEN_TTL_SECS", 900i64)?,
            refresh_token_ttl_secs: parse_var("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 3600i64)?,
            password_hash_cost,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Binding to {}", self.bind_addr);
        match &self.catalog {
            CatalogSource::Csv(path) => info!("Catalog source: CSV file {}", path.display()),
            CatalogSource::Remote(url) => info!("Catalog source: remote API {}", url),
        }
        info!(
            "Selections stored in {}, users read from {}",
            self.selections_csv_path.display(),
            self.users_csv_path.display()
        );
        info!("Dependency timeout: {} ms", self.dependency_timeout.as_millis());
    }
}
