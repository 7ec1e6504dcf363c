//! Leveled, optionally file-backed log setup on top of `tracing`/`tracing-subscriber`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::Result;

/// Map `--debug-level` (0..=3) to a `tracing::Level`.
pub fn level_for(debug_level: u8) -> Level {
    match debug_level {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Install the global tracing subscriber. With `logfile`, writes go through
/// [`TruncatingLogFile`] formatted with `[<unix-seconds>] <LEVEL>: ` per
/// line; without one, logs go to stderr using the default human-readable
/// formatter.
pub fn init(debug_level: u8, logfile: Option<&Path>, max_logfile_size_mb: u64) -> Result<()> {
    let level = level_for(debug_level);

    match logfile {
        Some(path) => {
            let writer = TruncatingLogFile::open(path, max_logfile_size_mb)?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(writer)
                .with_ansi(false)
                .event_format(PrefixedPlainFormat)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).with_writer(io::stderr).init();
        }
    }

    Ok(())
}

/// Formats each event as `[<unix-seconds>] <LEVEL>: <fields>`, matching the
/// persisted logfile format.
struct PrefixedPlainFormat;

impl<S, N> FormatEvent<S, N> for PrefixedPlainFormat
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
        write!(writer, "[{}] {}: ", unix_seconds(), event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// An append-mode log file that truncates itself in place once its length
/// exceeds `max_size_mb` MiB, rather than rotating to a new file. This is a
/// literal preserved behaviour, not a general rotation scheme, so it is
/// hand-written instead of delegated to a rotation crate.
#[derive(Clone)]
pub struct TruncatingLogFile {
    inner: std::sync::Arc<Mutex<File>>,
    path: PathBuf,
    max_size_bytes: u64,
}

impl TruncatingLogFile {
    pub fn open(path: &Path, max_size_mb: u64) -> Result<TruncatingLogFile> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TruncatingLogFile {
            inner: std::sync::Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            max_size_bytes: max_size_mb * 1024 * 1024,
        })
    }

    fn truncate_if_oversized(&self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let current_len = guard.metadata()?.len();
        if current_len > self.max_size_bytes {
            *guard = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        }
        Ok(())
    }
}

impl Write for TruncatingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.truncate_if_oversized()?;
        self.inner.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for TruncatingLogFile {
    type Writer = TruncatingLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn truncates_in_place_once_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");

        let mut writer = TruncatingLogFile::open(&path, 0).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.flush().unwrap();

        let size_before = std::fs::metadata(&path).unwrap().len();
        assert!(size_before > 0);

        writer.write_all(b"second line\n").unwrap();
        writer.flush().unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(!contents.contains("first line"));
        assert!(contents.contains("second line"));
    }

    #[test]
    fn debug_level_maps_to_expected_tracing_levels() {
        assert_eq!(level_for(0), Level::ERROR);
        assert_eq!(level_for(1), Level::WARN);
        assert_eq!(level_for(2), Level::INFO);
        assert_eq!(level_for(3), Level::DEBUG);
        assert_eq!(level_for(9), Level::DEBUG);
    }
}
