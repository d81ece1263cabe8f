//! Integration tests for codecell
//!
//! These tests require a working docker daemon and the configured language
//! images (python:3.12-alpine, gcc:13). Run with:
//!    cargo test -p codecell --features integration-tests -- --include-ignored
//!
//! All docker-dependent tests are marked `#[ignore]` so the suite stays
//! green on machines without docker.

#![cfg(feature = "integration-tests")]

use codecell::Config;

mod execution;
mod files;
mod interactive;
mod timeouts;

pub(crate) fn test_config() -> Config {
    Config::default()
}
