use std::sync::Once;

/// Installs the process-wide logger. Safe to call more than once; only the
/// first call has any effect.
pub fn init_logging(verbose: bool) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        let init_result = simple_logger::SimpleLogger::new()
            .with_level(level)
            .without_timestamps()
            .init();
        match init_result {
            Ok(_) => tree_debug!("Logging initialized"),
            // Someone else (e.g. an embedding app) already installed a logger.
            Err(e) => eprintln!("Failed to initialize logging: {}", e),
        }
    });
}
