//! Connection settings from the environment.
//!
//! `DATABASE_URL` wins when present. Otherwise the connection is assembled
//! from the discrete `DB_*` variables:
//!
//! | variable      | default     |
//! |---------------|-------------|
//! | `DB_HOST`     | `localhost` |
//! | `DB_PORT`     | `5432`      |
//! | `DB_USER`     | —           |
//! | `DB_PASSWORD` | —           |
//! | `DB_NAME`     | —           |
//! | `SSL_MODE`    | `prefer`    |

use std::env;
use std::fmt;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::DbError;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SSL_MODE: &str = "prefer";

/// Discrete connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            database: None,
            ssl_mode: DEFAULT_SSL_MODE.to_string(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DatabaseConfig {
    /// Read `DB_*` / `SSL_MODE` from the process environment.
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match non_empty("DB_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| DbError::Config(format!("DB_PORT must be a port number, got '{raw}'")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: non_empty("DB_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            user: non_empty("DB_USER"),
            password: non_empty("DB_PASSWORD"),
            database: non_empty("DB_NAME"),
            ssl_mode: non_empty("SSL_MODE").unwrap_or_else(|| DEFAULT_SSL_MODE.to_string()),
        })
    }

    /// Build sqlx connect options from these settings.
    pub fn connect_options(&self) -> Result<PgConnectOptions, DbError> {
        let ssl_mode = self.ssl_mode.parse::<PgSslMode>().map_err(|_| {
            DbError::Config(format!(
                "SSL_MODE must be one of disable, allow, prefer, require, verify-ca, verify-full; got '{}'",
                self.ssl_mode
            ))
        })?;

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .ssl_mode(ssl_mode);
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        Ok(options)
    }
}

/// Resolve connect options: an explicit URL if given, otherwise `DB_*`.
pub fn connect_options(database_url: Option<&str>) -> Result<PgConnectOptions, DbError> {
    match database_url.filter(|url| !url.trim().is_empty()) {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .map_err(|e| DbError::Config(format!("invalid database URL: {e}"))),
        None => DatabaseConfig::from_env()?.connect_options(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = DatabaseConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, DatabaseConfig::default());
    }

    #[test]
    fn discrete_variables_are_read() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_USER", "refrange"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_NAME", "refrange_hub"),
            ("SSL_MODE", "require"),
        ]))
        .expect("valid config");

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.user.as_deref(), Some("refrange"));
        assert_eq!(config.database.as_deref(), Some("refrange_hub"));

        let options = config.connect_options().expect("valid options");
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = DatabaseConfig::from_lookup(lookup(&[("DB_HOST", "  "), ("DB_PORT", "")]))
            .expect("valid config");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn bad_port_is_rejected() {
        let result = DatabaseConfig::from_lookup(lookup(&[("DB_PORT", "five")]));
        assert!(matches!(result, Err(DbError::Config(msg)) if msg.contains("DB_PORT")));
    }

    #[test]
    fn bad_ssl_mode_is_rejected() {
        let config = DatabaseConfig { ssl_mode: "sometimes".into(), ..DatabaseConfig::default() };
        assert!(matches!(config.connect_options(), Err(DbError::Config(_))));
    }

    #[test]
    fn debug_output_hides_password() {
        let config = DatabaseConfig { password: Some("s3cret".into()), ..DatabaseConfig::default() };
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn explicit_url_is_parsed() {
        let options = connect_options(Some("postgres://u:p@example.com:5433/app?sslmode=disable"))
            .expect("valid url");
        assert_eq!(options.get_host(), "example.com");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("app"));
    }

    #[test]
    fn malformed_url_is_a_config_error() {
        assert!(matches!(connect_options(Some("not a url")), Err(DbError::Config(_))));
    }
}
