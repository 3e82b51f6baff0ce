//! Logging helpers
//!
//! Thin wrapper around `env_logger` so the binary and the tests share one
//! initialisation path.

/// Initialise the logging system
///
/// `RUST_LOG` takes precedence over `level` when it is set.
///
/// # Parameters
///
/// * `level` - Default log filter, e.g. `info` or `protocol_sniffer=debug`
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or(env_logger::DEFAULT_FILTER_ENV, level);

    // A second initialisation (tests, embedding applications) is not an error.
    let _ = env_logger::try_init_from_env(env);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice() {
        init_logger("debug");
        init_logger("info");
        log::debug!("logger initialised");
    }
}
