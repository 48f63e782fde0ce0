//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

use custody_types::{LedgerError, Result};

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already installed.
pub fn init(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| LedgerError::Configuration(format!("tracing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        let _ = init(false);
        assert!(matches!(init(true), Err(LedgerError::Configuration(_))));
    }
}
