//! Logging setup
//!
//! Human-readable runs log to stderr. JSON runs log into a [`LogBuffer`] so the
//! captured text can be embedded in the output document instead of
//! interleaving with it.

use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Error;

/// Shared in-memory log sink
#[derive(Clone, Debug, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

/// Writer handed out per event by [`LogBuffer`]
pub struct LogBufferWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the default level (`info`, or `debug` when verbose).
/// With a capture buffer, output goes there without ANSI colors.
pub fn init_logging(verbose: bool, capture: Option<LogBuffer>) -> Result<(), Error> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match capture {
        Some(buffer) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(buffer),
            )
            .try_init(),
        None => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| Error::internal_with_context("logging", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_buffer_collects_writes_from_all_writers() {
        let buffer = LogBuffer::new();
        buffer.make_writer().write_all(b"first line\n").unwrap();
        buffer.make_writer().write_all(b"second line\n").unwrap();
        assert_eq!(buffer.contents(), "first line\nsecond line\n");
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = LogBuffer::new();
        let clone = buffer.clone();
        clone.make_writer().write_all(b"shared").unwrap();
        assert_eq!(buffer.contents(), "shared");
    }

    #[test]
    fn test_captured_events_land_in_buffer() {
        let buffer = LogBuffer::new();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(buffer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(suite = "basic", "suite finished");
        });
        let text = buffer.contents();
        assert!(text.contains("suite finished"));
        assert!(text.contains("suite=\"basic\""));
    }
}
