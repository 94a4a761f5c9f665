// LogQuest - app/mod.rs
//
// Application layer: search dispatch, cancellation handles, session store.
// Dependencies: core layer, util.
// Must NOT depend on: platform specifics. Engines are reached only through
// the `SearchClient` trait.

pub mod client;
pub mod dispatcher;
pub mod handles;
pub mod store;
