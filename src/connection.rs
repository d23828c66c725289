//! Connection descriptors and the Source/Destination registry.
//!
//! Descriptors live for one operation only. The registry is resolved once
//! at start from the environment and handed to operations explicitly.

use crate::core::{ConnectionSide, ForgeError};
use sqlx::postgres::PgConnectOptions;
use std::collections::HashMap;
use std::str::FromStr;

pub const SOURCE_ENV: &str = "SOURCE_DATABASE_URL";
pub const DESTINATION_ENV: &str = "DESTINATION_DATABASE_URL";

pub const DEFAULT_PORT: u16 = 5432;

/// Where to connect: an opaque URI or explicit parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Uri(String),
    Params {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: Option<String>,
    },
}

/// Raw, unvalidated connection input as it arrives from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInput {
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionInput {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uri.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.database.is_none()
            && self.user.is_none()
            && self.password.is_none()
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl ConnectionDescriptor {
    /// Validates a URI descriptor.
    pub fn uri(uri: &str) -> Result<Self, ForgeError> {
        let uri = uri.trim();
        if uri.starts_with("postgres://") || uri.starts_with("postgresql://") {
            Ok(ConnectionDescriptor::Uri(uri.to_string()))
        } else {
            Err(ForgeError::Validation(
                "connection URI must start with postgres:// or postgresql://".to_string(),
            ))
        }
    }

    /// Resolves raw input into exactly one descriptor form.
    ///
    /// Both forms at once, neither form, or a parameter set without host,
    /// database or user is a validation error.
    pub fn from_input(input: &ConnectionInput, side: ConnectionSide) -> Result<Self, ForgeError> {
        let has_params = input.host.is_some()
            || input.port.is_some()
            || input.database.is_some()
            || input.user.is_some()
            || input.password.is_some();

        match (non_empty(input.uri.as_ref()), has_params) {
            (Some(_), true) => Err(ForgeError::Validation(format!(
                "{side} connection: give either a URI or host/port/database/user, not both"
            ))),
            (Some(uri), false) => Self::uri(uri)
                .map_err(|e| ForgeError::Validation(format!("{side} connection: {e}"))),
            (None, true) => {
                let missing: Vec<&str> = [
                    ("host", non_empty(input.host.as_ref())),
                    ("database", non_empty(input.database.as_ref())),
                    ("user", non_empty(input.user.as_ref())),
                ]
                .iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| *name)
                .collect();

                if !missing.is_empty() {
                    return Err(ForgeError::Validation(format!(
                        "{side} connection is incomplete, missing: {}",
                        missing.join(", ")
                    )));
                }

                let port = input.port.unwrap_or(DEFAULT_PORT);
                if port == 0 {
                    return Err(ForgeError::Validation(format!(
                        "{side} connection: port must be between 1 and 65535"
                    )));
                }

                Ok(ConnectionDescriptor::Params {
                    host: non_empty(input.host.as_ref()).unwrap_or_default().to_string(),
                    port,
                    database: non_empty(input.database.as_ref())
                        .unwrap_or_default()
                        .to_string(),
                    user: non_empty(input.user.as_ref()).unwrap_or_default().to_string(),
                    password: input.password.clone(),
                })
            }
            (None, false) => Err(ForgeError::Validation(format!(
                "{side} connection is missing"
            ))),
        }
    }

    /// DSN text: the URI verbatim, or a libpq keyword/value string.
    #[must_use]
    pub fn to_dsn(&self) -> String {
        match self {
            ConnectionDescriptor::Uri(uri) => uri.clone(),
            ConnectionDescriptor::Params {
                host,
                port,
                database,
                user,
                password,
            } => {
                let mut dsn = format!(
                    "host={} port={} dbname={} user={}",
                    conninfo_value(host),
                    port,
                    conninfo_value(database),
                    conninfo_value(user)
                );
                if let Some(password) = password {
                    dsn.push_str(&format!(" password={}", conninfo_value(password)));
                }
                dsn
            }
        }
    }

    /// DSN with the password replaced, for logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            ConnectionDescriptor::Uri(uri) => redact_uri(uri),
            ConnectionDescriptor::Params {
                host,
                port,
                database,
                user,
                ..
            } => format!("{user}@{host}:{port}/{database}"),
        }
    }

    /// sqlx connect options for a live connection.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ForgeError> {
        match self {
            ConnectionDescriptor::Uri(uri) => PgConnectOptions::from_str(uri)
                .map_err(|e| ForgeError::Validation(format!("invalid connection URI: {e}"))),
            ConnectionDescriptor::Params {
                host,
                port,
                database,
                user,
                password,
            } => {
                let mut options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(database)
                    .username(user);
                if let Some(password) = password {
                    options = options.password(password);
                }
                Ok(options)
            }
        }
    }
}

fn conninfo_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    // passwords may carry a raw '@'; the host part never does
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => uri.to_string(),
    }
}

/// Source and Destination descriptors supplied out of band.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    pub source: Option<ConnectionDescriptor>,
    pub destination: Option<ConnectionDescriptor>,
}

impl ConnectionRegistry {
    /// Reads the registry from the process environment.
    pub fn from_env() -> Result<Self, ForgeError> {
        Self::from_vars(std::env::vars())
    }

    /// Builds the registry from any set of variables; empty values are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, ForgeError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let lookup = |key: &str| -> Result<Option<ConnectionDescriptor>, ForgeError> {
            match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(value) => ConnectionDescriptor::uri(value)
                    .map(Some)
                    .map_err(|e| ForgeError::Config(format!("{key}: {e}"))),
                None => Ok(None),
            }
        };

        Ok(Self {
            source: lookup(SOURCE_ENV)?,
            destination: lookup(DESTINATION_ENV)?,
        })
    }

    /// Both sides configured: migration commands need no connection flags.
    #[must_use]
    pub fn quick_mode(&self) -> bool {
        self.source.is_some() && self.destination.is_some()
    }

    /// Explicit input wins; otherwise the registry entry for that side.
    pub fn resolve(
        &self,
        input: &ConnectionInput,
        side: ConnectionSide,
    ) -> Result<ConnectionDescriptor, ForgeError> {
        if !input.is_empty() {
            return ConnectionDescriptor::from_input(input, side);
        }

        let registered = match side {
            ConnectionSide::Source | ConnectionSide::Database => self.source.as_ref(),
            ConnectionSide::Destination => self.destination.as_ref(),
        };

        registered.cloned().ok_or_else(|| {
            ForgeError::Validation(format!(
                "{side} connection is missing (pass it explicitly or set {})",
                if side == ConnectionSide::Destination {
                    DESTINATION_ENV
                } else {
                    SOURCE_ENV
                }
            ))
        })
    }
}
