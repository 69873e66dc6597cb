//! Sandbox lifecycle store for aido
//!
//! Creates sandbox directories, persists metadata and run history, appends
//! to the event log, and destroys sandboxes explicitly or once their TTL
//! has passed.

pub mod error;
pub mod layout;
pub mod lock;
pub mod metadata;
pub mod store;

pub use error::{Result, StoreError};
pub use layout::{SandboxLayout, STATE_DIR_NAME};
pub use metadata::{events, Event, RunOutcome, RunRecord, SandboxMetadata, SandboxStatus};
pub use store::{generate_run_id, generate_sandbox_id, SandboxStore};
