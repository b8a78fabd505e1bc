//! Logging setup: console output plus a size/count-bounded rotating log file
//!
//! The file side mirrors classic `RotatingFileHandler` semantics: when the
//! active file would exceed `max_bytes`, it is renamed to `<name>.1`,
//! existing backups shift up and the oldest beyond `backup_count` is
//! dropped. `max_bytes == 0` disables rotation.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::Result;

/// Size/count-bounded rotating file writer usable as a tracing `MakeWriter`.
#[derive(Debug, Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    /// Open (or create) the log file in append mode.
    pub fn new(path: PathBuf, max_bytes: u64, backup_count: usize) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path,
                max_bytes,
                backup_count,
                file,
                written,
            })),
        })
    }

    /// Bytes currently in the active file.
    pub fn current_size(&self) -> u64 {
        self.inner.lock().expect("log writer lock poisoned").written
    }
}

impl Inner {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backup_count == 0 {
            // No backups kept: restart the active file in place.
            self.file = File::create(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let backup = |n: usize| {
            let mut name = self.path.clone().into_os_string();
            name.push(format!(".{n}"));
            PathBuf::from(name)
        };

        // Shift <name>.N-1 -> <name>.N, dropping the oldest.
        let _ = std::fs::remove_file(backup(self.backup_count));
        for n in (1..self.backup_count).rev() {
            let _ = std::fs::rename(backup(n), backup(n + 1));
        }
        std::fs::rename(&self.path, backup(1))?;

        self.file = File::create(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes
        {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber: compact console layer on stderr plus a
/// detailed file layer under `LOG_DIR`.
///
/// `RUST_LOG` takes precedence over the built-in filter; `VERBOSE_DEBUG=true`
/// widens the crate's own level to debug. Calling this twice is a no-op (a
/// global tracing subscriber can only be installed once per process).
pub fn configure_logging(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;
    let file_writer = RotatingFileWriter::new(
        config.log_file_path(),
        config.log_max_bytes,
        config.log_backup_count,
    )?;

    let default_level = if config.verbose_debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("error,pgrag={default_level}")));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false);

    // Already-installed subscriber (tests, repeated calls) is not an error.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}
