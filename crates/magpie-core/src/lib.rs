mod error;

pub use error::{
    ErrorKind, ExitCode, MagpieError, MagpieResult, extract_http_status,
    extract_retry_after_seconds,
};
