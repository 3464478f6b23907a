use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown network kind: {0}")]
    UnknownNetworkKind(String),

    #[error("unknown wallet status: {0}")]
    UnknownWalletStatus(u8),
}
