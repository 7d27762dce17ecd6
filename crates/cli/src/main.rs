mod args;
mod error_presentation;
mod settings;

use std::{process::ExitCode, thread};

use clap::Parser;
use sqlbind_core::{CancellationToken, PrincipalManager};
use sqlbind_dialect_mssql::MssqlDialect;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    args::{Cli, Command},
    error_presentation::{CliResult, render_runtime_error},
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(Some(output)) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", render_runtime_error(error));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<Option<String>> {
    let settings = settings::resolve(&cli.connection)?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let dialect = MssqlDialect;
    let mut manager = PrincipalManager::new(&dialect, settings.connection);
    if let Some(owner) = settings.fallback_owner {
        manager = manager.with_fallback_owner(owner);
    }

    match cli.command {
        Command::Create {
            username,
            binding_password,
            roles,
        } => {
            manager.create_binding(&cancel, &username, &binding_password, &roles)?;
            Ok(None)
        }
        Command::Delete { username } => {
            manager.delete_binding(&cancel, &username)?;
            Ok(None)
        }
        Command::Read { username } => {
            let exists = manager.read_binding(&cancel, &username)?;
            Ok(Some(exists.to_string()))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

// The blocking work owns the main thread, so Ctrl-C is watched from a
// helper thread with its own runtime.
fn cancel_on_interrupt(cancel: CancellationToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(error) => {
                warn!(%error, "interrupt handler unavailable");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        });
    });
}
