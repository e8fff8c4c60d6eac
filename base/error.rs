// This file is part of Fieldcast NVR, on-premise video capture/processing/
// delivery middleware for sports venues.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error classification shared by every component of the core.
//!
//! The five [`ErrorKind`] variants are exactly the ones the propagation
//! policy branches on: whether to retry locally, enqueue to the offline
//! queue, skip silently, mark a video failed, or exit the process.

use std::fmt;

/// How a failure should be handled by the worker that observed it.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network blip, transcoder crash, disk I/O glitch. Retry with backoff.
    Transient,
    /// Missing credential, invalid preset, bad config value. Log and skip;
    /// never crash the worker.
    Configuration,
    /// Checksum mismatch, corrupted artifact on HEAD validation. Mark the
    /// video `failed`; do not retry the same artifact.
    Integrity,
    /// No segments in range, booking in the future, booking cancelled.
    /// Skip silently.
    NotApplicable,
    /// Metadata store unreachable at startup. Exit non-zero so a process
    /// supervisor restarts us.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Integrity => "integrity",
            ErrorKind::NotApplicable => "not applicable",
            ErrorKind::Fatal => "fatal",
        })
    }
}

/// A classified error, carrying enough context to log and dispatch without
/// re-inspecting the source error's type.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(c) = &self.context {
            write!(f, ": {c}")?;
        }
        if let Some(s) = &self.source {
            write!(f, ": {s}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Renders the full cause chain, one `caused by:` line per source.
    pub fn chain(&self) -> String {
        let mut msg = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(c) = cause {
            msg.push_str("\ncaused by: ");
            msg.push_str(&c.to_string());
            cause = c.source();
        }
        msg
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            kind,
            context: None,
            source: None,
        }
    }
}

/// Extension methods for attaching an [`ErrorKind`] to any error type.
pub trait ResultExt<T> {
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error>;
    fn err_context(self, kind: ErrorKind, context: impl Into<String>) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error {
            kind,
            context: None,
            source: Some(Box::new(e)),
        })
    }

    fn err_context(self, kind: ErrorKind, context: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| Error {
            kind,
            context: Some(context.into()),
            source: Some(Box::new(e)),
        })
    }
}

/// Like `anyhow::bail!`, but the first argument names the [`ErrorKind`].
#[macro_export]
macro_rules! bail_t {
    ($t:ident, $fmt:expr) => {
        return Err($crate::Error::new($crate::ErrorKind::$t, format!($fmt)))
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        return Err($crate::Error::new($crate::ErrorKind::$t, format!($fmt, $($arg)+)))
    };
}

/// Like `anyhow::format_err!`, but the first argument names the [`ErrorKind`].
#[macro_export]
macro_rules! format_err_t {
    ($t:ident, $fmt:expr) => {
        $crate::Error::new($crate::ErrorKind::$t, format!($fmt))
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        $crate::Error::new($crate::ErrorKind::$t, format!($fmt, $($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bail_t_sets_kind() {
        fn f() -> Result<(), Error> {
            bail_t!(NotApplicable, "booking {} has no segments", 42);
        }
        let e = f().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotApplicable);
        assert_eq!(e.to_string(), "not applicable: booking 42 has no segments");
    }

    #[test]
    fn chain_includes_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e: Error = Result::<(), _>::Err(io_err)
            .err_context(ErrorKind::Transient, "opening segment")
            .unwrap_err();
        assert!(e.chain().contains("caused by:"));
    }
}
