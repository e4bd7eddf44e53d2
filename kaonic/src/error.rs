use core::fmt;

/// Errors returned across the comm stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An underlying device or transport operation failed.
    Fail,

    /// Invalid value supplied for an argument or decoded field.
    InvalidArg,

    /// Operation invoked in a state that does not allow it.
    ///
    /// This indicates misuse of the API: transmitting before `configure`,
    /// starting an already-running frontend, or addressing a module index
    /// that does not exist.
    PreconditionFailed,

    /// The operation did not complete within its time window.
    ///
    /// Receive paths surface this for an empty RX window; it is expected
    /// there and not a fault.
    Timeout,

    /// Transient back-pressure; the caller may retry later.
    NotReady,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::Fail => "operation failed",
            Error::InvalidArg => "invalid argument",
            Error::PreconditionFailed => "precondition failed",
            Error::Timeout => "timed out",
            Error::NotReady => "not ready",
        })
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ok_reduces_to_ok() {
        let results: [Result<()>; 3] = [Ok(()), Ok(()), Ok(())];
        assert!(results.into_iter().collect::<Result<Vec<_>>>().is_ok());

        let results: [Result<()>; 3] = [Ok(()), Err(Error::Fail), Ok(())];
        assert_eq!(
            results.into_iter().collect::<Result<Vec<_>>>(),
            Err(Error::Fail)
        );
    }
}
