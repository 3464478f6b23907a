//! Messages exchanged between the extension front-end and its background
//! context.
//!
//! Every message is a JSON object whose `type` field carries one of the
//! [`MessageType`] wire strings. Requests flow front → background, responses
//! flow back as [`WalletResponse`]s; [`WalletNotification`]s are pushed by the
//! background on its own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Wire tag of a wallet message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "THANOS_WALLET_STATE_UPDATED")]
    StateUpdated,
    #[serde(rename = "THANOS_WALLET_GET_STATE_REQUEST")]
    GetStateRequest,
    #[serde(rename = "THANOS_WALLET_GET_STATE_RESPONSE")]
    GetStateResponse,
    #[serde(rename = "THANOS_WALLET_NEW_WALLET_REQUEST")]
    NewWalletRequest,
    #[serde(rename = "THANOS_WALLET_NEW_WALLET_RESPONSE")]
    NewWalletResponse,
    #[serde(rename = "THANOS_WALLET_UNLOCK_REQUEST")]
    UnlockRequest,
    #[serde(rename = "THANOS_WALLET_UNLOCK_RESPONSE")]
    UnlockResponse,
    #[serde(rename = "THANOS_WALLET_LOCK_REQUEST")]
    LockRequest,
    #[serde(rename = "THANOS_WALLET_LOCK_RESPONSE")]
    LockResponse,
}

impl MessageType {
    pub const ALL: [MessageType; 9] = [
        Self::StateUpdated,
        Self::GetStateRequest,
        Self::GetStateResponse,
        Self::NewWalletRequest,
        Self::NewWalletResponse,
        Self::UnlockRequest,
        Self::UnlockResponse,
        Self::LockRequest,
        Self::LockResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateUpdated => "THANOS_WALLET_STATE_UPDATED",
            Self::GetStateRequest => "THANOS_WALLET_GET_STATE_REQUEST",
            Self::GetStateResponse => "THANOS_WALLET_GET_STATE_RESPONSE",
            Self::NewWalletRequest => "THANOS_WALLET_NEW_WALLET_REQUEST",
            Self::NewWalletResponse => "THANOS_WALLET_NEW_WALLET_RESPONSE",
            Self::UnlockRequest => "THANOS_WALLET_UNLOCK_REQUEST",
            Self::UnlockResponse => "THANOS_WALLET_UNLOCK_RESPONSE",
            Self::LockRequest => "THANOS_WALLET_LOCK_REQUEST",
            Self::LockResponse => "THANOS_WALLET_LOCK_RESPONSE",
        }
    }

    /// Whether this tag names a request (front → background).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::GetStateRequest | Self::NewWalletRequest | Self::UnlockRequest | Self::LockRequest
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownMessageType(s.to_string()))
    }
}

/// Lifecycle state of the wallet vault. Encoded as its ordinal on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WalletStatus {
    Idle,
    Locked,
    Ready,
}

impl From<WalletStatus> for u8 {
    fn from(status: WalletStatus) -> Self {
        match status {
            WalletStatus::Idle => 0,
            WalletStatus::Locked => 1,
            WalletStatus::Ready => 2,
        }
    }
}

impl TryFrom<u8> for WalletStatus {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Locked),
            2 => Ok(Self::Ready),
            other => Err(TypeError::UnknownWalletStatus(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub name: String,
    pub public_key_hash: String,
}

/// Snapshot of the wallet as seen by a front-end surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletFrontState {
    pub status: WalletStatus,
    pub accounts: Vec<WalletAccount>,
}

impl WalletFrontState {
    pub fn idle() -> Self {
        Self {
            status: WalletStatus::Idle,
            accounts: Vec::new(),
        }
    }
}

/// Request sent from a front-end surface to the background context.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalletRequest {
    #[serde(rename = "THANOS_WALLET_GET_STATE_REQUEST")]
    GetState,
    #[serde(rename = "THANOS_WALLET_NEW_WALLET_REQUEST")]
    NewWallet { mnemonic: String, password: String },
    #[serde(rename = "THANOS_WALLET_UNLOCK_REQUEST")]
    Unlock { password: String },
    #[serde(rename = "THANOS_WALLET_LOCK_REQUEST")]
    Lock,
}

impl WalletRequest {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::GetState => MessageType::GetStateRequest,
            Self::NewWallet { .. } => MessageType::NewWalletRequest,
            Self::Unlock { .. } => MessageType::UnlockRequest,
            Self::Lock => MessageType::LockRequest,
        }
    }
}

// Mnemonics and passwords must never reach logs.
impl fmt::Debug for WalletRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetState => f.write_str("GetState"),
            Self::NewWallet { .. } => f
                .debug_struct("NewWallet")
                .field("mnemonic", &"<redacted>")
                .field("password", &"<redacted>")
                .finish(),
            Self::Unlock { .. } => f
                .debug_struct("Unlock")
                .field("password", &"<redacted>")
                .finish(),
            Self::Lock => f.write_str("Lock"),
        }
    }
}

/// Reply from the background context to a [`WalletRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalletResponse {
    #[serde(rename = "THANOS_WALLET_GET_STATE_RESPONSE")]
    GetState { state: WalletFrontState },
    #[serde(rename = "THANOS_WALLET_NEW_WALLET_RESPONSE")]
    NewWallet,
    #[serde(rename = "THANOS_WALLET_UNLOCK_RESPONSE")]
    Unlock,
    #[serde(rename = "THANOS_WALLET_LOCK_RESPONSE")]
    Lock,
}

impl WalletResponse {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::GetState { .. } => MessageType::GetStateResponse,
            Self::NewWallet => MessageType::NewWalletResponse,
            Self::Unlock => MessageType::UnlockResponse,
            Self::Lock => MessageType::LockResponse,
        }
    }
}

/// Message pushed by the background context with no request to answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalletNotification {
    #[serde(rename = "THANOS_WALLET_STATE_UPDATED")]
    StateUpdated,
}

impl WalletNotification {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::StateUpdated => MessageType::StateUpdated,
        }
    }
}
