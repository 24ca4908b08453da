//! Error types for handle operations

use thiserror::Error;

/// Main error type for custody operations.
///
/// Most handle operations report failure by returning a null handle or
/// `None`; these variants back the `try_*` accessors for callers that want
/// to propagate the failure with `?`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    /// A weak handle was resolved after its target was finalized
    #[error("Use after expiry: {type_name} value has already been finalized")]
    UseAfterExpiry {
        /// Type of the managed value
        type_name: &'static str,
    },

    /// An exclusive handle was read or transferred after losing ownership
    #[error("Double transfer: exclusive handle to {type_name} is null")]
    DoubleTransfer {
        /// Type of the managed value
        type_name: &'static str,
    },

    /// Exclusive access was requested for a value with other owners or observers
    #[error("Value is shared: {strong} strong and {weak} weak handles outstanding")]
    SharedOwners {
        /// Live strong handles, including the caller's
        strong: usize,
        /// Live weak handles
        weak: usize,
    },
}

/// Result type alias for custody operations
pub type Result<T> = std::result::Result<T, CustodyError>;
