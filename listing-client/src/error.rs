use thiserror::Error;
use crate::directory::{Endpoint, ExchangeFailure};

/// Why a controller operation did not complete successfully.
///
/// None of these are fatal: the controller is always back in a quiescent
/// state by the time one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Another exchange was in flight; nothing was sent.
    #[error("a directory exchange is already in flight")]
    Busy,

    /// `update` without override while not registered; nothing was sent.
    #[error("server is not registered with the directory")]
    NotRegistered,

    /// The exchange completed with a non-success outcome.
    #[error("{endpoint} exchange failed: {failure}")]
    Transport {
        endpoint: Endpoint,
        failure: ExchangeFailure,
    },
}
