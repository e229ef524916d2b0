//! Security event reporting.
//!
//! Events go through `tracing` under the `alert` target; the binary decides where
//! they end up (stderr and the security log). Critical events are emitted at error
//! level with a `critical = true` field so filters and log readers can pick them out.

use std::fmt;

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record a security event.
pub fn log_event(severity: Severity, message: impl AsRef<str>) {
    let message = message.as_ref();
    match severity {
        Severity::Info => tracing::info!(target: "alert", "{message}"),
        Severity::Warning => tracing::warn!(target: "alert", "{message}"),
        Severity::Error => tracing::error!(target: "alert", "{message}"),
        Severity::Critical => {
            tracing::error!(target: "alert", critical = true, "CRITICAL: {message}")
        }
    }
}

/// Run `f` under a plain-text subscriber and return what it logged.
#[cfg(test)]
pub(crate) fn capture_events(f: impl FnOnce()) -> String {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
