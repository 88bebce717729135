use crate::Error;
use crate::Result;

/// Result of a repository call.
///
/// Logical absence of a node is a regular answer, not an error.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    NotFound,
    Failed(Error),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Outcome::NotFound)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The value, if any. Failures are discarded.
    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn err(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// `NotFound` becomes `Ok(None)`, failures become `Err`.
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Outcome::Ok(v) => Ok(Some(v)),
            Outcome::NotFound => Ok(None),
            Outcome::Failed(e) => Err(e),
        }
    }

    pub fn map<U, F>(
        self,
        f: F,
    ) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    pub fn unwrap_or(
        self,
        default: T,
    ) -> T {
        match self {
            Outcome::Ok(v) => v,
            _ => default,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Outcome::Ok(_) => "ok",
            Outcome::NotFound => "not_found",
            Outcome::Failed(_) => "failed",
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(e) if e.is_not_found() => Outcome::NotFound,
            Err(e) => Outcome::Failed(e),
        }
    }
}
