//! # User Profiles
//!
//! One profile per wallet address, provisioned lazily the first time a
//! wallet authenticates. Profiles are never deleted by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::error::{check_len, require_text, CoreError};
use crate::identity::WalletAddress;
use crate::role::Role;

/// Ledger network recorded when a caller does not name one.
pub const DEFAULT_NETWORK: &str = "avalanche-fuji";

const MAX_ORGANIZATION: usize = 200;
const MAX_POSITION: usize = 100;
const MAX_PHONE: usize = 20;
const MAX_ADDRESS: usize = 500;
const MAX_NETWORK: usize = 50;

/// A wallet-linked user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub wallet_address: WalletAddress,
    pub role: Role,
    pub organization: String,
    pub position: String,
    pub phone: String,
    pub address: String,
    /// Preferred disclosure level. Informational; access decisions use `role`.
    pub privacy_level: Role,
    pub blockchain_network: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Provision a fresh profile for `wallet` with the given role.
    pub fn provision(
        wallet: WalletAddress,
        role: Role,
        network: Option<&str>,
    ) -> Result<Self, CoreError> {
        let network = network
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_NETWORK);
        require_text(network, "blockchain_network", MAX_NETWORK)?;
        let now = clock::now();
        Ok(Self {
            id: Uuid::new_v4(),
            wallet_address: wallet,
            role,
            organization: String::new(),
            position: String::new(),
            phone: String::new(),
            address: String::new(),
            privacy_level: Role::Public,
            blockchain_network: network.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a contact-detail update, returning the names of changed fields.
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<Vec<&'static str>, CoreError> {
        update.validate()?;
        let mut changed = Vec::new();
        let pairs = [
            (update.organization, &mut self.organization, "organization"),
            (update.position, &mut self.position, "position"),
            (update.phone, &mut self.phone, "phone"),
            (update.address, &mut self.address, "address"),
        ];
        for (value, slot, name) in pairs {
            if let Some(v) = value {
                if *slot != v {
                    *slot = v;
                    changed.push(name);
                }
            }
        }
        if let Some(level) = update.privacy_level {
            if self.privacy_level != level {
                self.privacy_level = level;
                changed.push("privacy_level");
            }
        }
        if !changed.is_empty() {
            self.updated_at = clock::advance(self.updated_at);
        }
        Ok(changed)
    }

    /// Change the access role.
    pub fn set_role(&mut self, role: Role) {
        if self.role != role {
            self.role = role;
            self.updated_at = clock::advance(self.updated_at);
        }
    }
}

/// Editable contact details. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    pub organization: Option<String>,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub privacy_level: Option<Role>,
}

impl ProfileUpdate {
    fn validate(&self) -> Result<(), CoreError> {
        let limits = [
            (&self.organization, "organization", MAX_ORGANIZATION),
            (&self.position, "position", MAX_POSITION),
            (&self.phone, "phone", MAX_PHONE),
            (&self.address, "address", MAX_ADDRESS),
        ];
        for (value, field, max) in limits {
            if let Some(v) = value {
                check_len(v, field, max)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> WalletAddress {
        WalletAddress::parse("0xABCDEF").unwrap()
    }

    #[test]
    fn provision_defaults() {
        let p = UserProfile::provision(wallet(), Role::Public, None).unwrap();
        assert_eq!(p.blockchain_network, DEFAULT_NETWORK);
        assert_eq!(p.privacy_level, Role::Public);
        assert_eq!(p.wallet_address.as_str(), "0xabcdef");
        assert!(p.organization.is_empty());
    }

    #[test]
    fn provision_blank_network_uses_default() {
        let p = UserProfile::provision(wallet(), Role::Admin, Some("  ")).unwrap();
        assert_eq!(p.blockchain_network, DEFAULT_NETWORK);
        assert_eq!(p.role, Role::Admin);
    }

    #[test]
    fn provision_custom_network() {
        let p = UserProfile::provision(wallet(), Role::Public, Some("avalanche-mainnet")).unwrap();
        assert_eq!(p.blockchain_network, "avalanche-mainnet");
    }

    #[test]
    fn apply_updates_only_given_fields() {
        let mut p = UserProfile::provision(wallet(), Role::Public, None).unwrap();
        let changed = p
            .apply(ProfileUpdate {
                organization: Some("Cooperativa Sur".into()),
                phone: Some("+57 300".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(changed, vec!["organization", "phone"]);
        assert_eq!(p.organization, "Cooperativa Sur");
        assert!(p.position.is_empty());
    }

    #[test]
    fn apply_rejects_long_phone_without_mutating() {
        let mut p = UserProfile::provision(wallet(), Role::Public, None).unwrap();
        let before = p.clone();
        let err = p
            .apply(ProfileUpdate {
                organization: Some("x".into()),
                phone: Some("1".repeat(21)),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, CoreError::FieldTooLong { field: "phone", max: 20 });
        assert_eq!(p, before);
    }

    #[test]
    fn set_role_changes_role() {
        let mut p = UserProfile::provision(wallet(), Role::Public, None).unwrap();
        p.set_role(Role::Enterprise);
        assert_eq!(p.role, Role::Enterprise);
    }
}
