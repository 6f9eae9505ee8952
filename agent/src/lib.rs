//! Reason-then-act agent harness.
//!
//! An agent drives a language model through repeated cycles of context
//! building, model query, action parsing and tool dispatch until the model
//! calls `finish` or the step budget runs out. The crate keeps a strict split:
//!
//! - **[`core`]**: In-memory logic (protocol parsing, history tree, guards,
//!   line splicing). No file, process or network I/O.
//! - **[`io`]**: Side-effecting adapters (config, processes, model backends,
//!   sandbox, prompt templates, trajectory export).
//!
//! [`agent`] runs the control loop; [`dispatch`] and [`tools`] resolve and
//! execute actions.

pub mod agent;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
