//! Process environment detection.
//!
//! Centralizes the handful of environment questions the rest of the crate
//! cares about: is this running in CI, and is this a debug build.

use std::env;

/// Checks if the application is running in a CI (Continuous Integration) environment.
pub fn is_ci() -> bool {
    env::var("CI").is_ok()
        || env::var("CONTINUOUS_INTEGRATION").is_ok()
        || env::var("GITHUB_ACTIONS").is_ok()
        || env::var("GITLAB_CI").is_ok()
        || env::var("BUILDKITE").is_ok()
}

/// Checks if the application is running in a development (debug) build.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}
