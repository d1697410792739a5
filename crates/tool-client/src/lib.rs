//! `ap-tools` — the Tool Invoker (C1).
//!
//! Validated HTTP calls to registered external tool servers, with
//! allowlist enforcement and `/command`-specific success classification.
//! Tool-server discovery and registry CRUD live outside this crate; it
//! only consumes [`ap_domain::registry::ToolRegistry`] snapshots.

pub mod invoker;

pub use invoker::{
    classify_command_result, classify_step_result, is_command_call, CommandOutcome, InvokeResult, StepOutcome,
    ToolInvoker,
};
