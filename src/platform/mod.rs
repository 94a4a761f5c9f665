// LogQuest - platform/mod.rs
//
// Platform layer: filesystem-backed search engine, directory resolution,
// and config.toml loading.
// Dependencies: app (for the SearchClient trait), core, util.

pub mod config;
pub mod local_engine;
