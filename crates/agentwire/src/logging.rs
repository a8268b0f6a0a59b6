use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Dependencies that log every request at info; capped unless `RUST_LOG` says otherwise.
const NOISY_TARGETS: &[&str] = &["hyper=warn", "reqwest=warn", "rumqttc=warn", "btleplug=warn"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn level_filter(level: LogLevel) -> EnvFilter {
    NOISY_TARGETS.iter().fold(
        EnvFilter::default().add_directive(LevelFilter::from(level).into()),
        |filter, target| match target.parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

/// Pick the filter: non-empty, parseable `env` directives win over `level`.
fn build_filter(level: LogLevel, env: Option<&str>) -> EnvFilter {
    match env.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| level_filter(level))
        }
        None => level_filter(level),
    }
}

/// Install the stderr subscriber.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, env.as_deref()))
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_used_without_env() {
        let filter = build_filter(LogLevel::Debug, None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn env_directives_override_level() {
        let filter = build_filter(LogLevel::Warn, Some("trace"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn blank_env_falls_back_to_level() {
        let filter = build_filter(LogLevel::Error, Some("   "));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));
    }
}
