// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Library error codes and results.

use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 128;

/// Error kind to better contextualize the returned error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// Missing or malformed configuration. Fatal at startup.
    Configuration,
    /// Certificate authority unreachable or enrollment/registration rejected.
    IdentityFault,
    /// Local persistence failure.
    StorageFault,
    MalformedData,
    BadNetwork,
    /// At least one peer endorsement was not valid.
    ProposalRejected,
    /// The ordering service refused a fully endorsed transaction.
    SubmissionFault,
    /// No terminal commit event observed within the caller's wait.
    CommitTimeout,
    ListenerFault,
    ResourceNotFound,
    Other,
}

/// Error kind strings.
pub(super) mod error_kind_str {
    pub const CONFIGURATION: &str = "configuration error";
    pub const IDENTITY_FAULT: &str = "identity fault";
    pub const STORAGE_FAULT: &str = "storage fault";
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const BAD_NETWORK: &str = "bad network";
    pub const PROPOSAL_REJECTED: &str = "proposal rejected";
    pub const SUBMISSION_FAULT: &str = "submission fault";
    pub const COMMIT_TIMEOUT: &str = "commit timeout";
    pub const LISTENER_FAULT: &str = "listener fault";
    pub const RESOURCE_NOT_FOUND: &str = "resource not found";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            Configuration => error_kind_str::CONFIGURATION,
            IdentityFault => error_kind_str::IDENTITY_FAULT,
            StorageFault => error_kind_str::STORAGE_FAULT,
            MalformedData => error_kind_str::MALFORMED_DATA,
            BadNetwork => error_kind_str::BAD_NETWORK,
            ProposalRejected => error_kind_str::PROPOSAL_REJECTED,
            SubmissionFault => error_kind_str::SUBMISSION_FAULT,
            CommitTimeout => error_kind_str::COMMIT_TIMEOUT,
            ListenerFault => error_kind_str::LISTENER_FAULT,
            ResourceNotFound => error_kind_str::RESOURCE_NOT_FOUND,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` to identify the subsystem that may
/// have propagated the error.
#[derive(Debug)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Underlying cause, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::new_ext(ErrorKind::Other, s)
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(kind: ErrorKind) -> Self {
        Err(kind.into())
    }
}

impl Error {
    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(ref source) = self.source {
            let detail = format!(": {}", source);
            let max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            // Never cut a multi-byte character in half.
            let cut = (0..=max_len)
                .rev()
                .find(|i| detail.is_char_boundary(*i))
                .unwrap_or(0);
            err_string.push_str(&detail[..cut]);
        }
        err_string
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.source, &other.source) {
            (None, None) => true,
            (Some(a), Some(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use ErrorKind::*;

    #[test]
    fn generic_error_type() {
        let src1 = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");
        let src2 = io::Error::new(io::ErrorKind::TimedOut, "oh no?");
        let err1 = Error::new_ext(StorageFault, src1);
        let err2 = Error::new_ext(StorageFault, src2);

        assert_ne!(err1, err2);
    }

    #[test]
    fn external_storage_failure() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");

        let error = Error::new_ext(StorageFault, source);

        assert_eq!(error.to_string(), "storage fault");
        assert_eq!(error.to_string_full(), "storage fault: oh no!");
        let source = std::error::Error::source(&error)
            .unwrap()
            .downcast_ref::<io::Error>()
            .unwrap();
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn long_source_is_truncated() {
        let error = Error::new_ext(ProposalRejected, "x".repeat(1000));

        let full = error.to_string_full();

        assert_eq!(
            full.len(),
            "proposal rejected".len() + MAX_ERROR_SOURCE_STRING_LENGTH
        );
    }

    #[test]
    fn kind_into_result() {
        let res: Result<()> = CommitTimeout.into();

        assert_eq!(res.unwrap_err(), Error::new(CommitTimeout));
    }
}
