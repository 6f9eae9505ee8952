//! Side-effecting adapters: config files, processes, model backends and exports.

pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod trajectory;
