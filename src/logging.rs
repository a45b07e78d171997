//! Opt-in driver tracing.
//!
//! Nothing is installed unless `WHISKER_LOG` holds a filter directive
//! (`debug`, `whisker=trace`, ...). Output goes to stderr, or to the file
//! named by `WHISKER_LOG_FILE`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "WHISKER_LOG";
pub const LOG_FILE_ENV: &str = "WHISKER_LOG_FILE";

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Clone)]
struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.file {
            Some(file) => file.lock().write_all(buf)?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.file {
            Some(file) => file.lock().flush(),
            None => io::stderr().flush(),
        }
    }
}

/// Installs the global subscriber the first time an environment handle is
/// allocated. Later calls, or a subscriber installed by the host process,
/// leave things as they are.
pub fn init() {
    INSTALLED.get_or_init(|| {
        let Ok(directives) = std::env::var(LOG_ENV) else {
            return;
        };
        let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
        let file = std::env::var(LOG_FILE_ENV)
            .ok()
            .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
            .map(|f| Arc::new(Mutex::new(f)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(LogWriter { file })
            .with_ansi(false)
            .try_init();
    });
}
