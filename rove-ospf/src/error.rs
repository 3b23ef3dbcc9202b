//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

use crate::collections::InterfaceId;
use crate::lsa::LsaKey;
use crate::lsdb::LsaState;

// LSDB engine errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    InterfaceIdNotFound(InterfaceId),
    LsaEntryNotFound(LsaKey),
    // Record validation
    LsaInvalid(LsaKey, LsaValidationError),
    // Other
    LsaUnexpectedTransition(LsaState, LsaState),
}

// LSDB I/O errors.
#[derive(Debug)]
pub enum IoError {
    SendError(std::io::Error),
}

// LSA validation errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LsaValidationError {
    InvalidChecksum,
    InvalidLsaAge,
    InvalidLsaSeqNo,
    LsaTypeMismatch,
    EmptyRouterLinks,
    EmptyAttachedRouters,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self);
            }
            Error::LsaEntryNotFound(lsa_key) => {
                warn!(?lsa_key, "{}", self);
            }
            Error::LsaInvalid(lsa_key, error) => {
                warn!(?lsa_key, %error, "{}", self);
            }
            Error::LsaUnexpectedTransition(state, new_state) => {
                warn!(?state, ?new_state, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::LsaEntryNotFound(..) => {
                write!(f, "LSA entry not found")
            }
            Error::LsaInvalid(..) => {
                write!(f, "discarding invalid LSA")
            }
            Error::LsaUnexpectedTransition(..) => {
                write!(f, "unexpected LSA state transition")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SendError(..) => {
                write!(f, "failed to send link-state update")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SendError(error) => Some(error),
        }
    }
}

// ===== impl LsaValidationError =====

impl std::fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaValidationError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            LsaValidationError::InvalidLsaAge => {
                write!(f, "invalid age")
            }
            LsaValidationError::InvalidLsaSeqNo => {
                write!(f, "invalid sequence number")
            }
            LsaValidationError::LsaTypeMismatch => {
                write!(f, "header and body types mismatch")
            }
            LsaValidationError::EmptyRouterLinks => {
                write!(f, "router LSA without links")
            }
            LsaValidationError::EmptyAttachedRouters => {
                write!(f, "network LSA without attached routers")
            }
        }
    }
}

impl std::error::Error for LsaValidationError {}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
