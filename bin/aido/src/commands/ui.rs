use anyhow::Result;

use super::print_json;

/// Placeholder until the terminal UI exists
pub(crate) fn handle_ui(json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({ "available": false }));
    }
    println!("The interactive UI is not available yet.");
    println!("Use `aido sandbox list` and `aido logs` instead.");
    Ok(())
}
