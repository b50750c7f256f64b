use std::io;

use thiserror::Error;

/// Failures detected while consuming an encrypted stream.
///
/// Padding anomalies are deliberately reported as [`Error::Integrity`] so
/// that a tampered stream cannot be distinguished from a wrong passphrase
/// by the shape of the error.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended before a complete header, a whole number of
    /// ciphertext blocks, or the trailing authentication tag was available.
    #[error("stream truncated: {0}")]
    Truncated(&'static str),
    /// The authentication tag did not verify.
    #[error("integrity check failed: data is damaged or the passphrase is wrong")]
    Integrity,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Truncated(_) => io::ErrorKind::UnexpectedEof,
            Error::Integrity => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

impl Error {
    /// Recovers a chlorocrypt error from an I/O error produced by
    /// [`DecryptingReader`](crate::DecryptingReader), if there is one.
    /// Callers use this to distinguish damaged data from plain I/O failures.
    #[must_use]
    pub fn find_in(err: &io::Error) -> Option<&Error> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<Error>())
    }
}
