//! Unified error type.

use std::net::AddrParseError;

use crate::router::RouteError;

/// The error type returned by switchyard's fallible setup and serving calls.
///
/// Request-level failures (404, 429, 500) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// registration mistakes and infrastructure failures: a bad bind address,
/// binding to a port or accepting a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid socket address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: AddrParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_errors_convert() {
        let route =
            RouteError::InvalidPattern { pattern: "/*".into(), reason: "empty wildcard name" };
        let err: Error = route.into();
        assert!(matches!(err, Error::Route(_)));
        assert!(err.to_string().contains("/*"));
    }
}
