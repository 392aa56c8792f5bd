//! Line-oriented log output for cron/systemd capture.
//!
//! Every event renders as `<UTC timestamp> <TAG> <message> [key=value ...]`
//! where the tag is `OK` for info, `WARN` for warnings and `FAIL` for errors.

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub fn severity_tag(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "FAIL",
        Level::WARN => "WARN",
        Level::INFO => "OK",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

pub struct TaggedFormat;

impl<S, N> FormatEvent<S, N> for TaggedFormat
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
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        write!(writer, "{ts} {} ", severity_tag(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `RUST_LOG` narrows or widens the default
/// `info` level. JSON mode keeps stdout for the document and logs to stderr.
pub fn init(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .event_format(TaggedFormat);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.with_writer(std::io::stdout).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(emit: impl FnOnce()) -> String {
        let buf = SharedBuf::default();
        let sink = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(TaggedFormat)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn tags_follow_severity() {
        assert_eq!(severity_tag(&Level::INFO), "OK");
        assert_eq!(severity_tag(&Level::WARN), "WARN");
        assert_eq!(severity_tag(&Level::ERROR), "FAIL");
    }

    #[test]
    fn line_has_timestamp_tag_message_and_fields() {
        let out = capture(|| tracing::error!(probes = 2, "gateway still unhealthy"));
        let line = out.lines().next().unwrap();
        let mut parts = line.splitn(3, ' ');
        let ts = parts.next().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%SZ").is_ok());
        assert_eq!(parts.next(), Some("FAIL"));
        assert_eq!(parts.next(), Some("gateway still unhealthy probes=2"));
    }

    #[test]
    fn one_line_per_event() {
        let out = capture(|| {
            tracing::info!("gateway healthy");
            tracing::warn!("restarting");
        });
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" OK gateway healthy"));
        assert!(lines[1].ends_with(" WARN restarting"));
    }
}
