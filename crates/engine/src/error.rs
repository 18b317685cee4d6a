//! The module contains the errors the engine can throw.
//!
//! Recoverable input errors ([`InvalidName`], [`InvalidAmount`],
//! [`InvalidSplit`], [`InvalidUtr`], [`MissingUpiHandle`]) are meant to be
//! shown to the user so the input can be corrected. [`OverSettlement`] is
//! advisory: the caller renders a warning and may retry with the override
//! flag set. Everything else aborts the operation.
//!
//!  [`InvalidName`]: EngineError::InvalidName
//!  [`InvalidAmount`]: EngineError::InvalidAmount
//!  [`InvalidSplit`]: EngineError::InvalidSplit
//!  [`InvalidUtr`]: EngineError::InvalidUtr
//!  [`MissingUpiHandle`]: EngineError::MissingUpiHandle
//!  [`OverSettlement`]: EngineError::OverSettlement
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid split: {0}")]
    InvalidSplit(String),
    #[error("Invalid UTR: {0}")]
    InvalidUtr(String),
    #[error("Missing UPI handle: {0}")]
    MissingUpiHandle(String),
    #[error(
        "Over-settlement: pending and confirmed payments of {pending_minor} exceed the actual debt of {actual_minor}"
    )]
    OverSettlement {
        actual_minor: i64,
        pending_minor: i64,
    },
    #[error("Invalid settlement state: {0}")]
    InvalidState(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidName(a), Self::InvalidName(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidSplit(a), Self::InvalidSplit(b)) => a == b,
            (Self::InvalidUtr(a), Self::InvalidUtr(b)) => a == b,
            (Self::MissingUpiHandle(a), Self::MissingUpiHandle(b)) => a == b,
            (
                Self::OverSettlement {
                    actual_minor: a1,
                    pending_minor: p1,
                },
                Self::OverSettlement {
                    actual_minor: a2,
                    pending_minor: p2,
                },
            ) => a1 == a2 && p1 == p2,
            (Self::InvalidState(a), Self::InvalidState(b)) => a == b,
            (Self::PermissionDenied(a), Self::PermissionDenied(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
