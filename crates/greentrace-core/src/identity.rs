//! # Wallet Identity
//!
//! The wallet address is the only external identity correlator GreenTrace
//! knows about. It is opaque: no signature or checksum verification happens
//! here. Hex addresses are lowercased so that checksummed and plain spellings
//! of the same account resolve to one profile.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum stored length of a wallet address (an EVM address is 42 chars).
pub const MAX_WALLET_LEN: usize = 42;

/// A validated, normalized wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Validate and normalize a wallet address.
    ///
    /// Leading and trailing whitespace is trimmed. The result must be
    /// non-empty, at most [`MAX_WALLET_LEN`] characters, and contain no
    /// interior whitespace. `0x`-prefixed hex strings are lowercased.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidWallet("wallet address required".into()));
        }
        if trimmed.chars().count() > MAX_WALLET_LEN {
            return Err(CoreError::InvalidWallet(format!(
                "wallet address must not exceed {MAX_WALLET_LEN} characters"
            )));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidWallet(
                "wallet address must not contain whitespace".into(),
            ));
        }
        let normalized = if is_hex_address(trimmed) {
            trimmed.to_ascii_lowercase()
        } else {
            trimmed.to_string()
        };
        Ok(Self(normalized))
    }

    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix used when deriving display names.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

fn is_hex_address(s: &str) -> bool {
    let body = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    matches!(body, Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

impl TryFrom<String> for WalletAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WalletAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
