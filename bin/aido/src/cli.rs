use aido_observability::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default runtime for `sandbox up` without a spec file
pub(crate) const DEFAULT_RUNTIME: &str = "python";

/// Default TTL for `sandbox up` without a spec file
pub(crate) const DEFAULT_TTL: &str = "1h";

/// Run untrusted tasks in short-lived, resource-bounded sandboxes
#[derive(Parser)]
#[command(name = "aido")]
#[command(version, about = "Run untrusted tasks in short-lived, resource-bounded sandboxes")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Project directory holding the `.aido` state directory.
    /// Defaults to the current directory.
    #[arg(long, env = "AIDO_WORKSPACE", global = true)]
    pub(crate) workspace: Option<PathBuf>,

    /// Console log format: pretty, compact, or json
    #[arg(long, env = "AIDO_LOG_FORMAT", global = true)]
    pub(crate) log_format: Option<LogFormat>,

    /// Also write JSON logs to daily-rotated files in this directory
    #[arg(long, env = "AIDO_LOG_DIR", global = true)]
    pub(crate) log_dir: Option<PathBuf>,

    /// Docker engine socket. Defaults to DOCKER_HOST or /var/run/docker.sock.
    #[arg(long, env = "AIDO_DOCKER_SOCKET", global = true)]
    pub(crate) docker_socket: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

impl Cli {
    /// Resolve the effective workspace directory
    pub(crate) fn effective_workspace(&self) -> std::io::Result<PathBuf> {
        match &self.workspace {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Manage sandboxes
    Sandbox {
        #[command(subcommand)]
        action: SandboxCommands,
    },

    /// Run a task inside a sandbox
    Run {
        /// Task file to execute
        task: PathBuf,

        /// Sandbox id. Defaults to the most recently created sandbox.
        #[arg(short, long)]
        sandbox: Option<String>,

        /// Allow a `readwrite` sandbox to mount its inputs writable
        #[arg(long)]
        dangerous_allow_mutations: bool,

        /// Enable networking even if the sandbox spec disables it
        #[arg(long)]
        network: bool,
    },

    /// Show the captured output of the latest run
    Logs {
        /// Sandbox id. Defaults to the most recently created sandbox.
        #[arg(short, long)]
        sandbox: Option<String>,

        /// Show only stderr
        #[arg(long)]
        stderr: bool,
    },

    /// Interactive terminal UI (not available yet)
    Ui,
}

#[derive(Subcommand)]
pub(crate) enum SandboxCommands {
    /// Create a sandbox from a spec file or flags
    Up {
        /// Sandbox spec (YAML)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Sandbox name, overriding the spec file
        #[arg(short, long)]
        name: Option<String>,

        /// Runtime, e.g. python:3.11, node:20 or docker://<image>
        #[arg(short, long)]
        runtime: Option<String>,

        /// Time to live, e.g. 30m or 2h
        #[arg(short, long)]
        ttl: Option<String>,
    },

    /// List sandboxes
    #[command(alias = "ls")]
    List,

    /// Destroy one sandbox, or all of them
    Destroy {
        /// Sandbox id
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Destroy every sandbox
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Destroy every sandbox whose TTL has passed
    Cleanup,
}
