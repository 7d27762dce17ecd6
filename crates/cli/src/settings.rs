use std::{fs, path::Path};

use serde::Deserialize;
use sqlbind_core::{ConnectionConfig, EncryptMode};
use sqlbind_dialect_mssql::TRUST_SERVER_CERTIFICATE_KEY;

use crate::{
    args::ConnectionArgs,
    error_presentation::{CliError, CliResult},
};

/// On-disk form of the connection flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ConfigFile {
    database: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    encrypt: Option<EncryptSetting>,
    trust_server_certificate: Option<bool>,
    fallback_owner: Option<String>,
}

// `encrypt: true` arrives as a YAML boolean, `encrypt: strict` as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EncryptSetting {
    Flag(bool),
    Mode(String),
}

#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) connection: ConnectionConfig,
    pub(crate) fallback_owner: Option<String>,
}

pub(crate) fn load_config_file(path: &Path) -> CliResult<ConfigFile> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| CliError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn resolve(args: &ConnectionArgs) -> CliResult<Settings> {
    let file = match &args.config {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    merge(args, file)
}

fn merge(args: &ConnectionArgs, file: ConfigFile) -> CliResult<Settings> {
    let database = args
        .database
        .clone()
        .or(file.database)
        .ok_or(CliError::MissingDatabase)?;

    let encrypt = match (args.encrypt, file.encrypt) {
        (Some(mode), _) => mode,
        (None, Some(EncryptSetting::Flag(true))) => EncryptMode::On,
        (None, Some(EncryptSetting::Flag(false))) => EncryptMode::Off,
        (None, Some(EncryptSetting::Mode(raw))) => raw.parse()?,
        (None, None) => EncryptMode::default(),
    };

    let mut connection = ConnectionConfig::new(database);
    connection.host = args.host.clone().or(file.host);
    connection.port = args.port.or(file.port);
    connection.user = args.user.clone().or(file.user);
    connection.password = args.password.clone().or(file.password);
    connection.encrypt = encrypt;
    if args.trust_server_certificate || file.trust_server_certificate.unwrap_or(false) {
        connection
            .extra
            .insert(TRUST_SERVER_CERTIFICATE_KEY.to_string(), "true".to_string());
    }

    Ok(Settings {
        connection,
        fallback_owner: args.fallback_owner.clone().or(file.fallback_owner),
    })
}
