//! Loads [`EnvboxConfig`] from `CODER_*` environment variables.

use anyhow::{Context, Result};

use crate::domain::config::{ENV_PREFIX, EnvboxConfig};

/// Read settings from the process environment.
///
/// # Errors
///
/// Returns an error if a variable is present but cannot be parsed, e.g. a
/// non-boolean `CODER_ADD_GPU`.
pub fn load_from_env() -> Result<EnvboxConfig> {
    envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("cannot read CODER_* settings")
}

/// Read settings from explicit key/value pairs.
///
/// # Errors
///
/// Same as [`load_from_env`].
pub fn load_from_pairs<I>(pairs: I) -> Result<EnvboxConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    envy::prefixed(ENV_PREFIX)
        .from_iter(pairs)
        .context("cannot read CODER_* settings")
}
