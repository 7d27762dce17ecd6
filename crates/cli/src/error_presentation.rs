use std::{io, path::PathBuf};

use miette::Report;
use sqlbind_core::{Error, ExecutionError};

const BINDING_CONTEXT: &str = "while managing binding";
const CONFIG_READ_CONTEXT: &str = "while reading config file";
const CONFIG_PARSE_CONTEXT: &str = "while parsing config file";

pub(crate) type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug)]
pub(crate) enum CliError {
    MissingDatabase,
    ReadConfig {
        path: PathBuf,
        source: io::Error,
    },
    ParseConfig {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    Core(Error),
}

impl From<Error> for CliError {
    fn from(value: Error) -> Self {
        Self::Core(value)
    }
}

pub(crate) fn render_runtime_error(error: CliError) -> String {
    match error {
        CliError::MissingDatabase => format!("[usage] {}", missing_database_message()),
        CliError::ReadConfig { path, source } => {
            let context = format!("{CONFIG_READ_CONTEXT} `{}`", path.display());
            let report = report_with_context(source, context);
            format!("[io] {report}")
        }
        CliError::ParseConfig { path, source } => {
            let context = format!("{CONFIG_PARSE_CONTEXT} `{}`", path.display());
            let report = report_with_context(source, context);
            format!("[config] {report}")
        }
        CliError::Core(source) => {
            let category = core_category(&source);
            let report = report_with_context(source, BINDING_CONTEXT);
            format!("[{category}] {report}")
        }
    }
}

fn report_with_context<E, C>(source: E, context: C) -> Report
where
    E: std::error::Error + Send + Sync + 'static,
    C: Into<String>,
{
    let anyhow_error = anyhow::Error::new(source).context(context.into());
    miette::miette!("{anyhow_error:#}")
}

// Connect, config and cancellation failures keep their category under any
// number of binding wrappers; a failed statement inside a step is `binding`.
pub(crate) fn core_category(error: &Error) -> &'static str {
    match error {
        Error::Execute(ExecutionError::Connect { .. }) => "connect",
        Error::Execute(ExecutionError::StatementFailed { .. }) => "execute",
        Error::Binding(binding) => match core_category(binding.cause()) {
            "execute" | "binding" => "binding",
            root => root,
        },
        Error::Config(_) => "config",
        Error::Cancelled => "cancelled",
    }
}

fn missing_database_message() -> &'static str {
    "missing target database: pass --database <NAME> or set `database` in the --config file"
}
