//! Structured logging setup shared by every Uzenet binary. Each service
//! builds one root `slog::Logger` at startup and derives child loggers
//! (per-player, per-connection) from it via `.new(o!(...))`.

use slog::Drain;

/// Builds the default terminal logger: level-filtered by `RUST_LOG`-style
/// severity, human-readable, synchronized across the threads every service
/// spawns one-per-connection.
pub fn init(level: slog::Level) -> slog::Logger {
    use sloggers::terminal::{Destination, TerminalLoggerBuilder};
    use sloggers::types::Severity;
    use sloggers::Build;

    let severity = match level {
        slog::Level::Critical | slog::Level::Error => Severity::Error,
        slog::Level::Warning => Severity::Warning,
        slog::Level::Info => Severity::Info,
        slog::Level::Debug => Severity::Debug,
        slog::Level::Trace => Severity::Trace,
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);

    builder.build().expect("failed to build terminal logger")
}

/// Logger for local development and unit tests: a plain, unbuffered drain
/// with no level filtering.
pub fn test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}
