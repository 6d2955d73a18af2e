use std::fmt;

#[cfg(debug_assertions)]
mod error_impl {
    use super::{Error, ErrorExt, ErrorKind};

    pub type ErrorInner = Box<Chained>;

    #[derive(Clone, Debug)]
    pub struct Chained {
        this: &'static ErrorKind,
        src: Option<Error>,
    }
    impl ErrorExt for Error {
        #[inline]
        fn kind(&self) -> ErrorKind {
            *self.inner.this
        }
        #[inline]
        fn source(&self) -> Option<&Error> {
            self.inner.src.as_ref()
        }
        #[inline]
        fn chain_ctx(self, ctx: &'static ErrorKind) -> Error {
            Error {
                inner: Chained {
                    this: ctx,
                    src: Some(self),
                }
                .into(),
            }
        }
    }
    impl From<&'static ErrorKind> for Error {
        #[inline]
        fn from(kind: &'static ErrorKind) -> Error {
            Error {
                inner: Chained {
                    this: kind,
                    src: None,
                }
                .into(),
            }
        }
    }
}

#[cfg(not(debug_assertions))]
mod error_impl {
    use super::{Error, ErrorExt, ErrorKind};

    /// In release mode errors are just a thin pointer.
    pub type ErrorInner = &'static ErrorKind;
    impl ErrorExt for Error {
        #[inline]
        fn kind(&self) -> ErrorKind {
            *self.inner
        }
        #[inline]
        fn source(&self) -> Option<&Error> {
            None
        }
        #[inline]
        fn chain_ctx(self, ctx: &'static ErrorKind) -> Error {
            Error { inner: ctx }
        }
    }
    impl From<&'static ErrorKind> for Error {
        #[inline]
        fn from(inner: &'static ErrorKind) -> Error {
            Error { inner }
        }
    }
}

/// Represents an error while building a tempo map or converting between time representations.
///
/// This type wraps an `ErrorKind` and includes error chain data in debug mode.
/// In release mode it is a newtype wrapper around `ErrorKind`, so the `Error::source` method
/// always returns `None`.
///
/// Conversions never mutate the tempo map they read from, so an error can always be discarded
/// without cleanup.
#[derive(Clone)]
pub struct Error {
    inner: self::error_impl::ErrorInner,
}
impl Error {
    /// Create a new error with the given `ErrorKind`.
    #[inline]
    pub fn new(kind: &'static ErrorKind) -> Error {
        Error::from(kind)
    }

    /// More information about the error itself.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        ErrorExt::kind(self)
    }

    /// The underlying cause for this error.
    ///
    /// Note that this method will always return `None` in release mode, since error chains
    /// are not tracked in release.
    #[inline]
    pub fn source(&self) -> Option<&Error> {
        ErrorExt::source(self)
    }
}
impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        let mut maybe_src = self.source();
        while let Some(src) = maybe_src {
            writeln!(f)?;
            write!(f, "  caused by: {}", src.kind())?;
            maybe_src = src.source();
        }
        Ok(())
    }
}
impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

trait ErrorExt {
    fn kind(&self) -> ErrorKind;
    fn source(&self) -> Option<&Error>;
    fn chain_ctx(self, ctx: &'static ErrorKind) -> Error;
}

/// The type of error that occurred.
///
/// Errors are broadly categorized into 3 classes, and specific error info is provided as a
/// non-normative string literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// An input value is outside of its domain: a zero tempo, a time signature denominator that
    /// is not a power of two, or an operation whose result would be negative.
    ///
    /// These are rejected before anything is modified.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The requested conversion has no defined mapping, like converting ticks into a musical
    /// fraction or dividing two bar/beat spans.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(&'static str),

    /// A raw tempo or time signature record does not respect the MIDI storage format.
    ///
    /// This kind of error is not emitted by default, only if the `strict` crate feature is
    /// enabled. Otherwise such records are skipped.
    #[error("malformed tempo map: {0}")]
    Malformed(&'static str),
}
impl ErrorKind {
    /// Get the informative message on what exactly went wrong.
    #[inline]
    pub fn message(&self) -> &'static str {
        match *self {
            ErrorKind::InvalidArgument(msg) => msg,
            ErrorKind::UnsupportedConversion(msg) => msg,
            ErrorKind::Malformed(msg) => msg,
        }
    }
}

/// The outcome of a text parser that did not produce a value.
///
/// `NotMatched` is the normal "try the next representation" answer and carries no blame;
/// `OutOfRange` means the text had the right shape but one of its components is unusable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("input does not match any time span format")]
    NotMatched,
    #[error("time span component out of range: {0}")]
    OutOfRange(&'static str),
}

macro_rules! err_invalid {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::InvalidArgument($msg);
        ERR_KIND
    }};
}
macro_rules! err_unsupported {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::UnsupportedConversion($msg);
        ERR_KIND
    }};
}
macro_rules! err_malformed {
    ($msg:expr) => {{
        const ERR_KIND: &'static ErrorKind = &ErrorKind::Malformed($msg);
        ERR_KIND
    }};
}

pub(crate) trait ResultExt<T> {
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error>;
}
impl<T> ResultExt<T> for StdResult<T, Error> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|err| err.chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for StdResult<T, &'static ErrorKind> {
    #[inline]
    fn context(self, ctx: &'static ErrorKind) -> StdResult<T, Error> {
        self.map_err(|errkind| Error::from(errkind).chain_ctx(ctx))
    }
}

/// The result type used throughout the crate.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use std::result::Result as StdResult;
