//! Built-in catalog of Tezos networks the wallet can connect to.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::TypeError;

/// Whether a network carries real value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Main,
    Test,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for NetworkKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "test" => Ok(Self::Test),
            other => Err(TypeError::UnknownNetworkKind(other.to_string())),
        }
    }
}

/// A network entry in the catalog.
///
/// `name` and `description` are the untranslated fallbacks; when an i18n key
/// is present the UI layer looks the text up instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_i18n_key: Option<&'static str>,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_i18n_key: Option<&'static str>,
    /// Contract used to read balances through lambda views, if deployed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda_contract: Option<&'static str>,
    #[serde(rename = "type")]
    pub kind: NetworkKind,
    #[serde(rename = "rpcBaseURL")]
    pub rpc_base_url: &'static str,
    pub color: &'static str,
    pub disabled: bool,
}

impl Network {
    pub fn is_mainnet(&self) -> bool {
        self.kind == NetworkKind::Main
    }
}

pub const NETWORKS: &[Network] = &[
    Network {
        id: "mainnet",
        name: "Tezos Mainnet",
        name_i18n_key: Some("tezosMainnet"),
        description: "Tezos mainnet",
        description_i18n_key: Some("tezosMainnetDescription"),
        lambda_contract: Some("KT1CPuTzwC7h7uLXd5WQmpMFso1HxrLBUtpE"),
        kind: NetworkKind::Main,
        rpc_base_url: "https://mainnet-tezos.giganode.io",
        color: "#83b300",
        disabled: false,
    },
    Network {
        id: "delphinet",
        name: "Delphi Testnet",
        name_i18n_key: None,
        description: "Delphi testnet",
        description_i18n_key: None,
        lambda_contract: Some("KT1EC1oaF3LwjiPto3fpUZiS3sWYuQHGxqXM"),
        kind: NetworkKind::Test,
        rpc_base_url: "https://testnet-tezos.giganode.io",
        color: "#ed6663",
        disabled: false,
    },
    Network {
        id: "edonet",
        name: "Edo Testnet",
        name_i18n_key: None,
        description: "Edo testnet",
        description_i18n_key: None,
        lambda_contract: Some("KT1QtbEVQ3tHPhL2GPTgWJPvhCER4gavWUun"),
        kind: NetworkKind::Test,
        rpc_base_url: "https://edonet-tezos.giganode.io",
        color: "#FBBF24",
        disabled: false,
    },
    Network {
        id: "sandbox",
        name: "localhost:8732",
        name_i18n_key: None,
        description: "Local sandbox",
        description_i18n_key: Some("localSandbox"),
        lambda_contract: None,
        kind: NetworkKind::Test,
        rpc_base_url: "http://localhost:8732",
        color: "#e9e1cc",
        disabled: false,
    },
];

/// Look up a catalog entry by its id.
pub fn network_by_id(id: &str) -> Result<&'static Network, TypeError> {
    NETWORKS
        .iter()
        .find(|n| n.id == id)
        .ok_or_else(|| TypeError::UnknownNetwork(id.to_string()))
}
