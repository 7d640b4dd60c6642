//! Logging setup
//!
//! The crate logs through the `log` facade; applications pick the sink. This
//! installs `env_logger` for binaries that have no logger of their own.

/// Initialize `env_logger` with a default filter
///
/// `RUST_LOG` still wins when it is set. Calling this twice is harmless.
pub fn init_with_level(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized, keeping existing configuration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_with_level("debug");
        init_with_level("warn");
        log::info!("still logging");
    }
}
