use std::path::PathBuf;

use tracing::level_filters::LevelFilter;

/// Where release builds write their logs when no directory is given
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proxyledger")
        .join("logs")
}

/// Initialize tracing (call once at startup).
///
/// Debug builds log to stderr. Release builds log to a daily rolling file
/// under `log_dir`, or [`default_log_dir`] when `None`.
#[allow(unused_variables)]
pub fn init_logging(log_dir: Option<PathBuf>) -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let level = resolve_log_level(std::env::var("RUST_LOG").ok().as_deref());

    #[cfg(debug_assertions)]
    {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init();
    }

    #[cfg(not(debug_assertions))]
    {
        use anyhow::Context;

        let log_dir = log_dir.unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let file_appender = tracing_appender::rolling::daily(&log_dir, "proxyledger_core");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // logging lasts until process exit
        std::mem::forget(guard);

        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(non_blocking)
            .try_init();
    }

    tracing::info!("Connection ledger core initialized v{}", crate::VERSION);
    Ok(())
}

fn resolve_log_level(value: Option<&str>) -> LevelFilter {
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        Some("off") => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(resolve_log_level(Some("DEBUG")), LevelFilter::DEBUG);
        assert_eq!(resolve_log_level(Some("Warning")), LevelFilter::WARN);
        assert_eq!(resolve_log_level(Some("verbose")), LevelFilter::INFO);
        assert_eq!(resolve_log_level(None), LevelFilter::INFO);
    }

    #[test]
    fn default_dir_ends_in_logs() {
        assert!(default_log_dir().ends_with("proxyledger/logs"));
    }
}
