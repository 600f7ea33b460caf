use env_logger::Env;

/// Installs `env_logger` unless the host already set a logger.
///
/// `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) {
    let installed = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
        .is_ok();

    if installed {
        log::debug!("logger installed with default filter '{}'", default_filter);
    }
}
