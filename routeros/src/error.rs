// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use rekon::{Classify, ErrorClass};
use std::time::Duration;

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Invalid router address '{0}'")]
    InvalidAddress(String),
    #[error("Failed to connect to router at {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Codec(CodecError),
    #[error("No reply from router within {0:?}")]
    Timeout(Duration),
    #[error("Connection closed by router")]
    Closed,
    #[error("Router terminated the session: {0}")]
    Fatal(String),
    #[error("Login rejected: {0}")]
    Login(String),
    #[error("Command '{command}' failed: {message}")]
    Trap { command: String, message: String },
}

impl From<CodecError> for RouterError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => RouterError::Io(e),
            e => RouterError::Codec(e),
        }
    }
}

impl RouterError {
    /// Tell if the connection this error happened on can't be used anymore
    #[must_use]
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            RouterError::Io(_)
                | RouterError::Codec(_)
                | RouterError::Timeout(_)
                | RouterError::Closed
                | RouterError::Fatal(_)
        )
    }
}

impl Classify for RouterError {
    fn class(&self) -> ErrorClass {
        match self {
            RouterError::InvalidAddress(_) | RouterError::Login(_) => ErrorClass::Fatal,
            RouterError::Trap { .. } => ErrorClass::Ignorable,
            RouterError::Connect { .. }
            | RouterError::Io(_)
            | RouterError::Codec(_)
            | RouterError::Timeout(_)
            | RouterError::Closed
            | RouterError::Fatal(_) => ErrorClass::Retryable,
        }
    }
}
