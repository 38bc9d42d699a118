// Public API - data types, session control and export functions
pub mod config;
pub mod export;
pub mod state;
pub mod trace;
pub mod upload;

// Command-line surface, public for the binary and integration tests
pub mod cli;
pub mod prefs;
pub mod probe;
