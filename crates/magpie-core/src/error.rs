use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Usage,
    NoAuth,
    AuthExpired,
    NoQueryId,
    Api,
    Decode,
    Aborted,
    Store,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    Auth = 3,
    Api = 4,
    Sync = 5,
    Io = 6,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct MagpieError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MagpieError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn no_auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoAuth, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthExpired, message)
    }

    pub fn no_query_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoQueryId, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted | ErrorKind::NoQueryId)
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind {
            ErrorKind::Usage => ExitCode::Usage,
            ErrorKind::NoAuth | ErrorKind::AuthExpired => ExitCode::Auth,
            ErrorKind::NoQueryId | ErrorKind::Api | ErrorKind::Decode => ExitCode::Api,
            ErrorKind::Aborted => ExitCode::Sync,
            ErrorKind::Store | ErrorKind::Io => ExitCode::Io,
        }
    }
}

impl From<std::io::Error> for MagpieError {
    fn from(value: std::io::Error) -> Self {
        Self::io(value.to_string())
    }
}

impl From<&str> for MagpieError {
    fn from(value: &str) -> Self {
        Self::usage(value)
    }
}

impl From<String> for MagpieError {
    fn from(value: String) -> Self {
        Self::usage(value)
    }
}

impl<T: Display> From<(ErrorKind, T)> for MagpieError {
    fn from((kind, value): (ErrorKind, T)) -> Self {
        Self::new(kind, value.to_string())
    }
}

pub type MagpieResult<T> = Result<T, MagpieError>;

pub fn extract_http_status(message: &str) -> Option<u16> {
    let marker = "[http_status=";
    let start = message.find(marker)?;
    let rest = &message[start + marker.len()..];
    let end = rest.find(']')?;
    rest[..end].parse::<u16>().ok()
}

pub fn extract_retry_after_seconds(message: &str) -> Option<u64> {
    let marker = "[retry_after_seconds=";
    let start = message.find(marker)?;
    let rest = &message[start + marker.len()..];
    let end = rest.find(']')?;
    rest[..end].parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_group_auth_and_api_kinds() {
        assert_eq!(MagpieError::no_auth("x").exit_code(), ExitCode::Auth);
        assert_eq!(MagpieError::auth_expired("x").exit_code(), ExitCode::Auth);
        assert_eq!(MagpieError::no_query_id("x").exit_code(), ExitCode::Api);
        assert_eq!(MagpieError::decode("x").exit_code(), ExitCode::Api);
        assert_eq!(MagpieError::aborted("x").exit_code(), ExitCode::Sync);
        assert_eq!(MagpieError::store("x").exit_code(), ExitCode::Io);
    }

    #[test]
    fn status_markers_round_trip() {
        let error = MagpieError::api("request failed [http_status=503]");
        assert_eq!(extract_http_status(&error.message), Some(503));
        assert_eq!(extract_retry_after_seconds(&error.message), None);

        let limited = MagpieError::api("slow down [retry_after_seconds=12] [http_status=429]");
        assert_eq!(extract_http_status(&limited.message), Some(429));
        assert_eq!(extract_retry_after_seconds(&limited.message), Some(12));
    }
}
