// LogQuest - lib.rs
//
// Library entry point, exposing the session lifecycle manager, the local
// search engine, and their supporting layers for the CLI and integration
// tests.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
