//! aido -- run untrusted tasks in short-lived, resource-bounded sandboxes.
//!
//! # Feature Flags
//!
//! - `docker` (default): Docker runtime support

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;

use aido_observability::{
    init_logging, FileLoggingConfig, LogFormat, LogLevel, LoggingConfig, RotationStrategy,
};
use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = logging_config(&cli);

    // Hold the guard for the process lifetime so file logs are flushed
    let _guard = match init_logging(&logging).context("Failed to initialize logging") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
    {
        Ok(rt) => match rt.block_on(run(cli)) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logging setup from verbosity, format flag, and terminal detection
fn logging_config(cli: &Cli) -> LoggingConfig {
    let level = LogLevel::from_verbosity(cli.verbose);
    let filter_directives = match cli.verbose {
        0 => Some(
            "aido=warn,aido_agent=warn,aido_sandbox=warn,aido_spec=warn,\
             bollard=error,hyper=error,warn"
                .to_string(),
        ),
        _ => None,
    };

    // Console logs go to stderr; use compact lines there, JSON when piped
    let format = cli.log_format.unwrap_or(if std::io::stderr().is_terminal() {
        LogFormat::Compact
    } else {
        LogFormat::Json
    });

    LoggingConfig {
        level,
        format,
        file: cli.log_dir.as_ref().map(|dir| FileLoggingConfig {
            directory: dir.clone(),
            prefix: "aido".to_string(),
            rotation: RotationStrategy::Daily,
        }),
        include_location: cli.verbose >= 3,
        filter_directives,
        ..Default::default()
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let workspace = cli
        .effective_workspace()
        .context("Failed to resolve workspace directory")?;
    tracing::debug!(workspace = %workspace.display(), "Resolved workspace");

    match &cli.command {
        Commands::Sandbox { action } => {
            commands::sandbox::handle_sandbox(action, &workspace, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            task,
            sandbox,
            dangerous_allow_mutations,
            network,
        } => {
            let options = aido_agent::RunOptions {
                sandbox_id: sandbox.clone(),
                task: task.clone(),
                allow_mutations: *dangerous_allow_mutations,
                enable_network: *network,
            };
            let exit_code = commands::run::handle_run(
                options,
                &workspace,
                cli.docker_socket.clone(),
                cli.json,
            )
            .await?;
            Ok(exit_code_from(exit_code))
        }
        Commands::Logs { sandbox, stderr } => {
            commands::logs::handle_logs(sandbox.as_deref(), *stderr, &workspace, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ui => {
            commands::ui::handle_ui(cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Process exit code for a task exit code; out-of-range codes become 1
fn exit_code_from(code: i64) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}
