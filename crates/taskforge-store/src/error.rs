use std::fmt;
use std::time::Duration;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the persistence layer.
///
/// Transient covers connection loss and lock contention; callers may
/// retry with backoff. Fatal covers schema and constraint violations;
/// retrying cannot help.
#[derive(Debug)]
pub enum Error {
    /// Connection-level failure; bounded retry is appropriate
    Transient(String),

    /// Schema or constraint violation; do not retry
    Fatal(String),

    /// Referenced row does not exist
    NotFound(String),

    /// Invalid argument or state transition
    Invalid(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transient(msg) => write!(f, "Transient store error: {}", msg),
            Error::Fatal(msg) => write!(f, "Fatal store error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Invalid(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull => Error::Transient(err.to_string()),
                ErrorCode::ConstraintViolation => Error::Fatal(err.to_string()),
                _ => Error::Fatal(err.to_string()),
            },
            _ => Error::Fatal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Fatal(format!("JSON column: {}", err))
    }
}

/// Run an operation, retrying on Transient errors with a fixed delay.
/// Used at recovery and store setup; single-attempt elsewhere.
pub fn with_retry<T>(
    attempts: usize,
    delay: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last = None;
    for attempt in 0..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(Error::Transient(msg)) => {
                last = Some(Error::Transient(msg));
                if attempt + 1 < attempts {
                    std::thread::sleep(delay);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| Error::Transient("no attempts made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_stops_on_fatal() {
        let mut calls = 0;
        let result: Result<()> = with_retry(5, Duration::from_millis(0), || {
            calls += 1;
            Err(Error::Fatal("constraint".to_string()))
        });
        assert!(matches!(result, Err(Error::Fatal(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_exhausts_on_transient() {
        let mut calls = 0;
        let result: Result<()> = with_retry(3, Duration::from_millis(0), || {
            calls += 1;
            Err(Error::Transient("busy".to_string()))
        });
        assert!(matches!(result, Err(Error::Transient(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let result = with_retry(5, Duration::from_millis(0), || {
            calls += 1;
            if calls < 3 {
                Err(Error::Transient("busy".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }
}
