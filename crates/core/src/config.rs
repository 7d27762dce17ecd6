use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{Error, error::REDACTED};

/// Transport encryption requested for the server connection, using the
/// `encrypt=` vocabulary of SQL Server connection strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncryptMode {
    /// No encryption at all, not even for the login packet.
    Disable,
    /// Only the login packet is encrypted.
    Off,
    #[default]
    On,
    Strict,
}

impl EncryptMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Off => "false",
            Self::On => "true",
            Self::Strict => "strict",
        }
    }
}

impl FromStr for EncryptMode {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "false" | "no" | "0" => Ok(Self::Off),
            "true" | "yes" | "1" | "" => Ok(Self::On),
            "strict" => Ok(Self::Strict),
            other => Err(Error::Config(format!(
                "unknown encrypt mode `{other}`; expected one of disable, false, true, strict"
            ))),
        }
    }
}

impl fmt::Display for EncryptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative connection parameters for the target server.
///
/// `database` names the database that bindings live in. Dialect-specific knobs
/// go in `extra` under namespaced keys such as `mssql.trust_server_certificate`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub encrypt: EncryptMode,
    pub extra: BTreeMap<String, String>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            database: database.into(),
            encrypt: EncryptMode::default(),
            extra: BTreeMap::new(),
        }
    }

    /// Reads a boolean knob from `extra`; absent keys yield `None`.
    pub fn extra_flag(&self, key: &str) -> Result<Option<bool>, Error> {
        let Some(raw) = self.extra.get(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            other => Err(Error::Config(format!(
                "`{key}` must be true or false, got `{other}`"
            ))),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("extra", &self.extra)
            .finish()
    }
}
