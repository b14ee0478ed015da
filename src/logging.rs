//! Tracing subscriber assembly: a severity-tagged colorized stdout layer and
//! an optional non-blocking file layer.

use std::fmt;
use std::path::Path;

use colored::Colorize;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

/// Formats each event as a `[SEVERITY]`-tagged line colored by level.
pub struct SeverityFormatter;

impl<S, N> FormatEvent<S, N> for SeverityFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so color applies to the whole line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let level = *event.metadata().level();
        let line = format!("[{}] {}", level, buffer);
        let colored_line = match level {
            Level::TRACE => line.bright_black(),
            Level::DEBUG => line.cyan(),
            Level::INFO => line.green(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
        };

        writeln!(writer, "{}", colored_line)
    }
}

/// Initialize the global subscriber.
///
/// Verbosity maps `0 → INFO`, `1 → DEBUG`, anything higher → TRACE. The
/// returned guard must be kept alive for the life of the process when file
/// logging is enabled.
pub fn init(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("tcpframe.log"));
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(level)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = if quiet {
        None
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(SeverityFormatter)
                .with_filter(level),
        )
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}
