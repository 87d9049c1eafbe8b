//! Error taxonomy for the cutover core.
//!
//! Each variant maps to one of the error kinds in the design: validation failures and
//! concurrent-deployment detection are fatal and reported to the operator as-is; the proxy
//! variants are recovered by the controller loop (it logs and retries after the step delay) and
//! only ever escape as an error if something above the loop chooses to propagate them.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CutoverError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ConcurrentDeployment(String),

    #[error("scheduler request failed: {method} {url} -> {status}")]
    Scheduler {
        method: String,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("proxy fleet transient failure: {0}")]
    ProxyTransient(String),

    #[error("proxy state not yet consistent with scheduler state: {0}")]
    ProxyInconsistent(String),
}

impl CutoverError {
    /// Process exit code for this error kind, per the CLI surface contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            CutoverError::Validation(_) => 1,
            CutoverError::ConcurrentDeployment(_) => 2,
            CutoverError::Scheduler { .. } => 3,
            CutoverError::ProxyTransient(_) | CutoverError::ProxyInconsistent(_) => 4,
        }
    }

    /// True for the two "try again after the step delay" kinds the controller loop swallows.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CutoverError::ProxyTransient(_) | CutoverError::ProxyInconsistent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_documented_contract() {
        assert_eq!(CutoverError::Validation("x".into()).exit_code(), 1);
        assert_eq!(
            CutoverError::ConcurrentDeployment("x".into()).exit_code(),
            2
        );
        assert_eq!(
            CutoverError::Scheduler {
                method: "GET".into(),
                url: "http://x".into(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new(),
            }
            .exit_code(),
            3
        );
        assert_eq!(CutoverError::ProxyTransient("x".into()).exit_code(), 4);
        assert_eq!(CutoverError::ProxyInconsistent("x".into()).exit_code(), 4);
    }

    #[test]
    fn only_proxy_kinds_are_retryable() {
        assert!(CutoverError::ProxyTransient("x".into()).is_retryable());
        assert!(CutoverError::ProxyInconsistent("x".into()).is_retryable());
        assert!(!CutoverError::Validation("x".into()).is_retryable());
        assert!(!CutoverError::ConcurrentDeployment("x".into()).is_retryable());
    }
}
