use std::path::Path;

use aido_agent::resolve_image;
use aido_sandbox::{SandboxMetadata, SandboxStore};
use aido_spec::SandboxConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::print_json;
use crate::cli::{SandboxCommands, DEFAULT_RUNTIME, DEFAULT_TTL};

/// One row of `sandbox list`
#[derive(Debug, Serialize)]
struct SandboxSummary<'a> {
    id: &'a str,
    name: &'a str,
    status: String,
    runtime: &'a str,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    runs: usize,
}

impl<'a> SandboxSummary<'a> {
    fn new(metadata: &'a SandboxMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id: &metadata.id,
            name: &metadata.config.name,
            status: metadata.status.to_string(),
            runtime: &metadata.config.runtime,
            created_at: metadata.created_at,
            expires_at: metadata.expires_at(),
            expired: metadata.is_expired_at(now),
            runs: metadata.runs.len(),
        }
    }
}

/// Handle sandbox commands
pub(crate) fn handle_sandbox(action: &SandboxCommands, workspace: &Path, json: bool) -> Result<()> {
    let store = SandboxStore::for_workspace(workspace);

    match action {
        SandboxCommands::Up {
            file,
            name,
            runtime,
            ttl,
        } => {
            let config = build_config(
                file.as_deref(),
                name.as_deref(),
                runtime.as_deref(),
                ttl.as_deref(),
            )?;
            let metadata = store.create(config).context("Failed to create sandbox")?;

            if json {
                return print_json(&metadata);
            }
            let config = &metadata.config;
            println!("Sandbox created successfully.");
            println!("  ID:      {}", metadata.id);
            println!("  Name:    {}", config.name);
            println!(
                "  Runtime: {} ({})",
                config.runtime,
                resolve_image(&config.runtime)
            );
            println!("  TTL:     {}", config.ttl);
            println!("  Inputs:  {} pattern(s)", config.inputs.len());
            println!("  Outputs: {} pattern(s)", config.outputs.len());
            println!();
            println!("Next: aido run <task> --sandbox {}", metadata.id);
            Ok(())
        }

        SandboxCommands::List => {
            let sandboxes = store.list().context("Failed to list sandboxes")?;
            let now = Utc::now();
            let rows: Vec<SandboxSummary<'_>> = sandboxes
                .iter()
                .map(|m| SandboxSummary::new(m, now))
                .collect();

            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("No sandboxes. Create one with: aido sandbox up");
                return Ok(());
            }
            println!(
                "{:<14} {:<20} {:<10} {:<18} {:<21} {:>4}",
                "ID", "NAME", "STATUS", "RUNTIME", "CREATED", "RUNS"
            );
            for row in &rows {
                let status = if row.expired {
                    format!("{} (expired)", row.status)
                } else {
                    row.status.clone()
                };
                println!(
                    "{:<14} {:<20} {:<10} {:<18} {:<21} {:>4}",
                    row.id,
                    row.name,
                    status,
                    row.runtime,
                    row.created_at.format("%Y-%m-%d %H:%M:%S"),
                    row.runs
                );
            }
            Ok(())
        }

        SandboxCommands::Destroy { id, all } => {
            if *all {
                let count = store.destroy_all().context("Failed to destroy sandboxes")?;
                if json {
                    return print_json(&serde_json::json!({ "destroyed": count }));
                }
                println!("Destroyed {count} sandbox(es).");
                return Ok(());
            }

            let id = id
                .as_deref()
                .context("A sandbox id is required unless --all is given")?;
            store
                .destroy(id)
                .with_context(|| format!("Failed to destroy sandbox {id}"))?;
            if json {
                return print_json(&serde_json::json!({ "destroyed": [id] }));
            }
            println!("Destroyed sandbox {id}.");
            Ok(())
        }

        SandboxCommands::Cleanup => {
            let count = store
                .cleanup_expired()
                .context("Failed to clean up expired sandboxes")?;
            if json {
                return print_json(&serde_json::json!({ "destroyed": count }));
            }
            println!("Removed {count} expired sandbox(es).");
            Ok(())
        }
    }
}

/// Spec file (if any) with flag overrides applied
fn build_config(
    file: Option<&Path>,
    name: Option<&str>,
    runtime: Option<&str>,
    ttl: Option<&str>,
) -> Result<SandboxConfig> {
    let mut config = match file {
        Some(path) => aido_spec::from_yaml_file(path)
            .with_context(|| format!("Failed to load sandbox spec {}", path.display()))?,
        None => SandboxConfig::new("sandbox", DEFAULT_RUNTIME, DEFAULT_TTL),
    };

    if let Some(name) = name {
        config.name = name.to_string();
    }
    if let Some(runtime) = runtime {
        config.runtime = runtime.to_string();
    }
    if let Some(ttl) = ttl {
        config.ttl = ttl.to_string();
    }
    Ok(config)
}
