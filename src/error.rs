// SPDX-License-Identifier: MIT

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum MultipartError {
    Io(io::Error),
    MalformedStream(String),
    HeaderSectionTooLarge(usize), // Contains the header block limit in bytes
    IllegalBoundary(String),
    ItemAlreadyClosed,
    InvalidConfiguration(String),
    // Threshold sink misuse
    SinkClosed,
    SinkNotClosed,
    TooManyParts(usize), // Contains the configured part limit
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::Io(err) => write!(f, "IO error: {err}"),
            MultipartError::MalformedStream(msg) => write!(f, "Malformed multipart stream: {msg}"),
            MultipartError::HeaderSectionTooLarge(limit) => {
                write!(
                    f,
                    "Header section has more than {limit} bytes (maybe it is not properly terminated)"
                )
            }
            MultipartError::IllegalBoundary(msg) => write!(f, "Illegal boundary: {msg}"),
            MultipartError::ItemAlreadyClosed => {
                write!(f, "Part body has already been closed or skipped")
            }
            MultipartError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            MultipartError::SinkClosed => write!(f, "Sink has already been closed"),
            MultipartError::SinkNotClosed => {
                write!(f, "Sink must be closed before its contents can be copied")
            }
            MultipartError::TooManyParts(max) => {
                write!(f, "Too many parts: maximum {max} allowed")
            }
        }
    }
}

impl std::error::Error for MultipartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MultipartError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MultipartError {
    fn from(err: io::Error) -> Self {
        // Body cursors tunnel scanner errors through `io::Read`; unwrap them here
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<MultipartError>())
        {
            let kind = err.kind();
            return match err.into_inner().map(|inner| inner.downcast::<MultipartError>()) {
                Some(Ok(inner)) => *inner,
                Some(Err(other)) => MultipartError::Io(io::Error::new(kind, other)),
                None => MultipartError::Io(io::Error::from(kind)),
            };
        }
        MultipartError::Io(err)
    }
}

impl From<MultipartError> for io::Error {
    fn from(err: MultipartError) -> Self {
        match err {
            MultipartError::Io(err) => err,
            err if err.is_malformed() => io::Error::new(io::ErrorKind::InvalidData, err),
            err => io::Error::other(err),
        }
    }
}

impl MultipartError {
    /// Creates a MalformedStream error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        MultipartError::MalformedStream(msg.into())
    }

    /// Creates an IllegalBoundary error
    pub fn illegal_boundary<S: Into<String>>(msg: S) -> Self {
        MultipartError::IllegalBoundary(msg.into())
    }

    /// Creates an InvalidConfiguration error
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        MultipartError::InvalidConfiguration(msg.into())
    }

    /// True for errors that mean the byte stream itself violates the multipart grammar.
    /// An oversized header section counts as malformed.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            MultipartError::MalformedStream(_) | MultipartError::HeaderSectionTooLarge(_)
        )
    }

    /// True for errors caused by the caller driving the API incorrectly
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            MultipartError::IllegalBoundary(_)
                | MultipartError::ItemAlreadyClosed
                | MultipartError::SinkClosed
                | MultipartError::SinkNotClosed
        )
    }
}
