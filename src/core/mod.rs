// LogQuest - core/mod.rs
//
// Core business logic layer: session model, result merging, query
// compilation, line parsing, export.
// Dependencies: util and pure-data crates only.
// Must NOT depend on: app or platform.

pub mod export;
pub mod merge;
pub mod model;
pub mod query;
pub mod record;
