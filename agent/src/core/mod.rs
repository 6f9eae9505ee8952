//! In-memory logic shared by the agent.
//!
//! Core modules do no file, process or network I/O. The one ambient input is
//! the wall clock `History::append` reads to timestamp messages; everything
//! else is deterministic.

pub mod budget;
pub mod edit;
pub mod guards;
pub mod history;
pub mod invariants;
pub mod protocol;
pub mod types;
