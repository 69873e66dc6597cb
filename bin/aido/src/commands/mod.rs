pub(crate) mod logs;
pub(crate) mod run;
pub(crate) mod sandbox;
pub(crate) mod ui;

use anyhow::{Context, Result};
use serde::Serialize;

/// Print `value` as pretty JSON on stdout
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize as JSON")?
    );
    Ok(())
}
