use tracing_subscriber::EnvFilter;

/// Default filter when neither `--log-filter` nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "info";

/// If a global subscriber is not already configured, log to stderr with the given filter,
/// and add our custom panic hook.
///
/// `RUST_LOG` wins over `filter` when it is set.
pub fn install_logger(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        update_panic_hook();
    }
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
