use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::sync::LazyLock;

use crate::shared::ValidationError;

/// Session settings shared by every mirror connection.
const COMMON_DATESTYLE: &str = "ISO";
const COMMON_INTERVALSTYLE: &str = "postgres";
const COMMON_EXTRA_FLOAT_DIGITS: i32 = 3;
const COMMON_CLIENT_ENCODING: &str = "UTF8";
const COMMON_TIMEZONE: &str = "UTC";

const APP_NAME_SOURCE: &str = "mirror_source";
const APP_NAME_TARGET: &str = "mirror_target";
const APP_NAME_REGISTRY: &str = "mirror_registry";

/// Session options for source connections.
///
/// Sources are only ever read, so sessions default to read-only transactions and long
/// running extraction queries are not cut short.
pub static MIRROR_SOURCE_OPTIONS: LazyLock<PgSessionOptions> =
    LazyLock::new(|| PgSessionOptions {
        statement_timeout: 0,
        lock_timeout: 30_000,
        idle_in_transaction_session_timeout: 0,
        read_only: true,
        application_name: APP_NAME_SOURCE.to_string(),
        ..PgSessionOptions::common()
    });

/// Session options for target connections used by load actions.
pub static MIRROR_TARGET_OPTIONS: LazyLock<PgSessionOptions> =
    LazyLock::new(|| PgSessionOptions {
        statement_timeout: 0,
        lock_timeout: 60_000,
        idle_in_transaction_session_timeout: 600_000,
        read_only: false,
        application_name: APP_NAME_TARGET.to_string(),
        ..PgSessionOptions::common()
    });

/// Session options for the registry bookkeeping connection.
pub static MIRROR_REGISTRY_OPTIONS: LazyLock<PgSessionOptions> =
    LazyLock::new(|| PgSessionOptions {
        statement_timeout: 30_000,
        lock_timeout: 10_000,
        idle_in_transaction_session_timeout: 60_000,
        read_only: false,
        application_name: APP_NAME_REGISTRY.to_string(),
        ..PgSessionOptions::common()
    });

/// Postgres session parameters applied at connection time.
#[derive(Debug, Clone)]
pub struct PgSessionOptions {
    pub datestyle: String,
    pub intervalstyle: String,
    pub extra_float_digits: i32,
    pub client_encoding: String,
    pub timezone: String,
    /// Milliseconds, `0` disables the timeout.
    pub statement_timeout: u32,
    pub lock_timeout: u32,
    pub idle_in_transaction_session_timeout: u32,
    pub read_only: bool,
    pub application_name: String,
}

impl PgSessionOptions {
    fn common() -> Self {
        Self {
            datestyle: COMMON_DATESTYLE.to_string(),
            intervalstyle: COMMON_INTERVALSTYLE.to_string(),
            extra_float_digits: COMMON_EXTRA_FLOAT_DIGITS,
            client_encoding: COMMON_CLIENT_ENCODING.to_string(),
            timezone: COMMON_TIMEZONE.to_string(),
            statement_timeout: 30_000,
            lock_timeout: 10_000,
            idle_in_transaction_session_timeout: 60_000,
            read_only: false,
            application_name: "mirror".to_string(),
        }
    }

    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        let read_only = if self.read_only { "on" } else { "off" };

        vec![
            ("datestyle".to_string(), self.datestyle.clone()),
            ("intervalstyle".to_string(), self.intervalstyle.clone()),
            (
                "extra_float_digits".to_string(),
                self.extra_float_digits.to_string(),
            ),
            ("client_encoding".to_string(), self.client_encoding.clone()),
            ("timezone".to_string(), self.timezone.clone()),
            (
                "statement_timeout".to_string(),
                self.statement_timeout.to_string(),
            ),
            ("lock_timeout".to_string(), self.lock_timeout.to_string()),
            (
                "idle_in_transaction_session_timeout".to_string(),
                self.idle_in_transaction_session_timeout.to_string(),
            ),
            (
                "default_transaction_read_only".to_string(),
                read_only.to_string(),
            ),
            ("application_name".to_string(), self.application_name.clone()),
        ]
    }
}

/// Connection settings of a Postgres database, either the target or one of the sources.
///
/// Not [`serde::Serialize`] on purpose: the password must never end up in serialized output.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM encoded root certificates.
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts connection settings into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database.
    fn without_db(&self, options: Option<&PgSessionOptions>) -> Output;

    /// Options for the configured database.
    fn with_db(&self, options: Option<&PgSessionOptions>) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self, options: Option<&PgSessionOptions>) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let mut connect_options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode);

        if self.tls.enabled {
            connect_options = connect_options
                .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        }

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        if let Some(options) = options {
            connect_options = connect_options.options(options.to_key_value_pairs());
        }

        connect_options
    }

    fn with_db(&self, options: Option<&PgSessionOptions>) -> PgConnectOptions {
        let connect_options: PgConnectOptions = self.without_db(options);
        connect_options.database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_sessions_are_read_only() {
        let pairs = MIRROR_SOURCE_OPTIONS.to_key_value_pairs();

        assert!(pairs.contains(&(
            "default_transaction_read_only".to_string(),
            "on".to_string()
        )));
        assert!(pairs.contains(&("application_name".to_string(), "mirror_source".to_string())));
    }

    #[test]
    fn target_sessions_are_writable() {
        let pairs = MIRROR_TARGET_OPTIONS.to_key_value_pairs();

        assert!(pairs.contains(&(
            "default_transaction_read_only".to_string(),
            "off".to_string()
        )));
        assert_eq!(MIRROR_TARGET_OPTIONS.timezone, "UTC");
    }

    #[test]
    fn enabled_tls_requires_root_certificates() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };

        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
        assert!(TlsConfig::disabled().validate().is_ok());
    }
}
