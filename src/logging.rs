use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use clap::ValueEnum;
use log::LevelFilter;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// `--loglevel` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "INFO")]
    Info,
    #[value(name = "DEBUG")]
    Debug,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

/// Initialize the logger with elapsed time on every line, written to stderr.
///
/// Output format: [HH:MM:SS] LEVEL: message. `RUST_LOG` still overrides per module.
pub fn init_logger(level: LevelFilter) {
    START_TIME.set(Instant::now()).ok();

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let elapsed = START_TIME.get().map(|t| t.elapsed()).unwrap_or_default();
            let hours = elapsed.as_secs() / 3600;
            let minutes = (elapsed.as_secs() % 3600) / 60;
            let seconds = elapsed.as_secs() % 60;

            writeln!(
                buf,
                "[{:02}:{:02}:{:02}] {}: {}",
                hours,
                minutes,
                seconds,
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}
