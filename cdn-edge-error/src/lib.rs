// Copyright 2024 The CDN Edge Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared error type used across every crate in the workspace.
//!
//! Every component returns `Result<T, Error>` instead of reaching for `anyhow` or a
//! bespoke enum per crate. The HTTP service layer is the only place that knows how to
//! turn a `Code` into a status line; everything below it just propagates `Error`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A coarse-grained classification of an error, independent of any transport.
///
/// Mirrors the small set of gRPC-style codes a store/cache/worker component actually
/// needs to distinguish, rather than a status code per failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Ok,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    Unauthenticated,
    Cancelled,
    Internal,
    Unknown,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The workspace's error type.
///
/// Carries a `Code` plus a stack of context messages. `err_tip` pushes a new message
/// onto the stack without discarding the original, so a deep call chain reads as a
/// breadcrumb trail instead of a single opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Error {
    pub code: Code,
    pub messages: Vec<String>,
}

impl Error {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Error {
            code,
            messages: vec![message.into()],
        }
    }

    /// Appends a context message, preserving the original cause at the front.
    #[must_use]
    pub fn append(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn messages_joined(&self) -> String {
        self.messages.join(" : ")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error {{ code: {:?}, messages: {:?} }}",
            self.code, self.messages
        )
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::other(err.to_string())
    }
}

/// Extension trait adding `.err_tip()` to any `Result<T, Error>`.
///
/// Use this at every layer boundary instead of letting a bare `Error` bubble up
/// unannotated — a caller three frames away should not have to guess which `get`
/// call actually failed.
pub trait ResultExt<T> {
    fn err_tip<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: fmt::Display;

    fn err_tip_with_code<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, D),
        D: fmt::Display;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn err_tip<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: fmt::Display,
    {
        self.map_err(|e| e.append(f().to_string()))
    }

    fn err_tip_with_code<F, D>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, D),
        D: fmt::Display,
    {
        self.map_err(|e| {
            let (code, msg) = f(&e);
            Error {
                code,
                messages: {
                    let mut messages = e.messages;
                    messages.push(msg.to_string());
                    messages
                },
            }
        })
    }
}

/// Merges a second error's messages into this one, keeping this error's `code`.
///
/// Used when two concurrent operations (e.g. a drain future and a producer future)
/// can both fail and neither failure should be silently dropped.
pub trait ErrorMerge {
    #[must_use]
    fn merge(self, other: Result<(), Error>) -> Self;
}

impl ErrorMerge for Result<(), Error> {
    fn merge(self, other: Result<(), Error>) -> Self {
        match (self, other) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(mut e), Err(other)) => {
                e.messages.extend(other.messages);
                Err(e)
            }
        }
    }
}

#[macro_export]
macro_rules! make_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::Error::new($code, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! make_input_err {
    ($($arg:tt)*) => {
        $crate::Error::new($crate::Code::InvalidArgument, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error_if {
    ($cond:expr, $code:expr, $($arg:tt)*) => {
        if $cond {
            return Err($crate::make_err!($code, $($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn err_tip_preserves_code_and_appends_message() {
        let result: Result<(), Error> = Err(make_err!(Code::NotFound, "object missing"));
        let result = result.err_tip(|| "while fetching bucket/key");
        let err = result.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
        assert_eq!(
            err.messages,
            vec!["object missing".to_string(), "while fetching bucket/key".to_string()]
        );
    }

    #[test]
    fn merge_combines_both_failures() {
        let a: Result<(), Error> = Err(make_err!(Code::Internal, "a failed"));
        let b: Result<(), Error> = Err(make_err!(Code::Internal, "b failed"));
        let merged = a.merge(b).unwrap_err();
        assert_eq!(merged.messages, vec!["a failed".to_string(), "b failed".to_string()]);
    }

    #[test]
    fn error_if_short_circuits() {
        fn check(n: i32) -> Result<(), Error> {
            error_if!(n < 0, Code::InvalidArgument, "n must be non-negative, got {n}");
            Ok(())
        }
        assert!(check(-1).is_err());
        assert!(check(1).is_ok());
    }
}
