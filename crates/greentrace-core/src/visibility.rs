//! # Visibility Resolver
//!
//! Decides which attribute groups of a [`Product`] a viewer receives.
//!
//! A group is disclosed iff the record's override flag for it is set, or the
//! viewer's role carries it in its default [`CapabilitySet`]. The public core
//! (id, name, batch id, certification, creation time, ledger hash) is always
//! disclosed.
//!
//! Listings apply a separate, coarser filter ([`list_visible`]) before
//! rendering: non-privileged viewers only see records whose four override
//! flags are all set, whatever their role's capabilities. The two rules are
//! intentionally distinct and must not be unified.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::identity::WalletAddress;
use crate::product::{Certification, Product};
use crate::profile::UserProfile;
use crate::role::{CapabilitySet, FieldGroup, Role, RoleRegistry};

/// The identity and role a request is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub profile_id: Uuid,
    pub wallet: WalletAddress,
    pub role: Role,
}

impl Viewer {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            profile_id: profile.id,
            wallet: profile.wallet_address.clone(),
            role: profile.role,
        }
    }

    /// Admins bypass list and verification filters.
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensitiveFields {
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerFields {
    pub producer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IotFields {
    pub iot_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarbonFields {
    pub carbon_activity: String,
}

/// A product filtered for one viewer. Withheld groups are absent keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub batch_id: String,
    pub certification: Certification,
    pub created_at: DateTime<Utc>,
    pub blockchain_hash: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<SensitiveFields>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub producer: Option<ProducerFields>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub iot: Option<IotFields>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub carbon: Option<CarbonFields>,
}

const CORE_FIELDS: [&str; 6] = [
    "id",
    "name",
    "batch_id",
    "certification",
    "created_at",
    "blockchain_hash",
];

impl ProductView {
    /// The groups present in this view.
    pub fn groups(&self) -> CapabilitySet {
        let present = [
            (FieldGroup::Sensitive, self.sensitive.is_some()),
            (FieldGroup::Producer, self.producer.is_some()),
            (FieldGroup::Iot, self.iot.is_some()),
            (FieldGroup::Carbon, self.carbon.is_some()),
        ];
        CapabilitySet::from_groups(present.into_iter().filter(|(_, p)| *p).map(|(g, _)| g))
    }

    /// Every attribute name disclosed by this view, core fields first.
    pub fn disclosed_fields(&self) -> Vec<String> {
        CORE_FIELDS
            .iter()
            .copied()
            .chain(self.groups().groups().iter().flat_map(|g| g.fields().iter().copied()))
            .map(str::to_string)
            .collect()
    }
}

/// Groups of `product` disclosed to `viewer`.
pub fn disclosed_groups(product: &Product, viewer: &Viewer, registry: &RoleRegistry) -> CapabilitySet {
    let caps = registry.capabilities_for(viewer.role);
    CapabilitySet::from_groups(
        FieldGroup::ALL
            .into_iter()
            .filter(|g| product.flags.get(*g) || caps.contains(*g)),
    )
}

/// Render `product` for `viewer`. Never fails.
pub fn resolve(product: &Product, viewer: &Viewer, registry: &RoleRegistry) -> ProductView {
    let groups = disclosed_groups(product, viewer, registry);
    ProductView {
        id: product.id,
        name: product.name.clone(),
        batch_id: product.batch_id.clone(),
        certification: product.certification,
        created_at: product.created_at,
        blockchain_hash: product.blockchain_hash.clone(),
        sensitive: groups.contains(FieldGroup::Sensitive).then(|| SensitiveFields {
            location: product.location.clone(),
            description: product.description.clone(),
        }),
        producer: groups.contains(FieldGroup::Producer).then(|| ProducerFields {
            producer: product.producer.clone(),
        }),
        iot: groups.contains(FieldGroup::Iot).then(|| IotFields {
            iot_data: product.iot_data.clone(),
        }),
        carbon: groups.contains(FieldGroup::Carbon).then(|| CarbonFields {
            carbon_activity: product.carbon_activity.clone(),
        }),
    }
}

/// Whether `product` appears in a listing for `viewer`.
pub fn list_visible(product: &Product, viewer: &Viewer) -> bool {
    viewer.is_privileged() || product.flags.is_fully_public()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{GroupFlags, NewProduct};

    fn product(flags: GroupFlags) -> Product {
        Product::create(
            NewProduct {
                name: "Cacao".into(),
                batch_id: "CAC-7".into(),
                certification: Certification::FairTrade,
                location: "Tumaco".into(),
                description: "Fine aroma".into(),
                producer: "Asociación Cacaotera".into(),
                iot_data: "{\"temp\":27}".into(),
                carbon_activity: "Reforestation".into(),
                flags,
                blockchain_hash: "0xfeed".into(),
                blockchain_network: None,
            },
            Uuid::new_v4(),
        )
        .unwrap()
    }

    fn viewer(role: Role) -> Viewer {
        Viewer {
            profile_id: Uuid::new_v4(),
            wallet: WalletAddress::parse("0xviewer").unwrap(),
            role,
        }
    }

    fn flags_from_bits(bits: u8) -> GroupFlags {
        GroupFlags {
            sensitive: bits & 1 != 0,
            producer: bits & 2 != 0,
            iot: bits & 4 != 0,
            carbon: bits & 8 != 0,
        }
    }

    fn assert_core_present(v: &serde_json::Value, p: &Product) {
        assert_eq!(v["id"], p.id.to_string());
        assert_eq!(v["name"], p.name);
        assert_eq!(v["batch_id"], p.batch_id);
        assert_eq!(v["certification"], p.certification.as_str());
        assert_eq!(v["blockchain_hash"], p.blockchain_hash);
        assert!(v.get("created_at").is_some());
    }

    #[test]
    fn every_role_and_flag_combination() {
        let registry = RoleRegistry::default();
        for role in Role::ALL {
            let caps = registry.capabilities_for(role);
            for bits in 0u8..16 {
                let flags = flags_from_bits(bits);
                let p = product(flags);
                let view = resolve(&p, &viewer(role), &registry);
                let json = serde_json::to_value(&view).unwrap();
                assert_core_present(&json, &p);
                for group in FieldGroup::ALL {
                    let expected = flags.get(group) || caps.contains(group);
                    for field in group.fields() {
                        assert_eq!(
                            json.get(*field).is_some(),
                            expected,
                            "role={role} bits={bits:04b} field={field}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn enterprise_sees_only_flagged_groups() {
        let registry = RoleRegistry::default();
        let p = product(GroupFlags {
            sensitive: true,
            producer: false,
            iot: true,
            carbon: true,
        });
        let view = resolve(&p, &viewer(Role::Enterprise), &registry);
        assert!(view.sensitive.is_some());
        assert!(view.producer.is_none());
        assert!(view.iot.is_some());
        assert!(view.carbon.is_some());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["location"], "Tumaco");
        assert!(json.get("producer").is_none());
    }

    #[test]
    fn partially_public_product_hidden_from_public_list() {
        let p = product(GroupFlags {
            sensitive: true,
            producer: false,
            iot: true,
            carbon: true,
        });
        assert!(!list_visible(&p, &viewer(Role::Public)));
        assert!(!list_visible(&p, &viewer(Role::Enterprise)));
        assert!(list_visible(&p, &viewer(Role::Admin)));
    }

    #[test]
    fn fully_public_product_listed_for_everyone() {
        let p = product(GroupFlags::all_public());
        for role in Role::ALL {
            assert!(list_visible(&p, &viewer(role)));
        }
    }

    #[test]
    fn private_role_gets_carbon_by_default() {
        let registry = RoleRegistry::default();
        let p = product(GroupFlags::all_private());
        let view = resolve(&p, &viewer(Role::Private), &registry);
        assert_eq!(view.groups().groups(), vec![FieldGroup::Carbon]);
    }

    #[test]
    fn disclosed_fields_lists_core_then_groups() {
        let registry = RoleRegistry::default();
        let p = product(GroupFlags {
            sensitive: false,
            producer: true,
            iot: false,
            carbon: false,
        });
        let view = resolve(&p, &viewer(Role::Enterprise), &registry);
        assert_eq!(
            view.disclosed_fields(),
            vec!["id", "name", "batch_id", "certification", "created_at", "blockchain_hash", "producer"]
        );
    }

    #[test]
    fn custom_registry_is_honoured() {
        let registry = RoleRegistry::from_yaml(
            "roles:\n  public: []\n  private: []\n  enterprise: [iot]\n  admin: []\n",
        )
        .unwrap();
        let p = product(GroupFlags::all_private());
        let view = resolve(&p, &viewer(Role::Enterprise), &registry);
        assert_eq!(view.groups().groups(), vec![FieldGroup::Iot]);
        let admin = resolve(&p, &viewer(Role::Admin), &registry);
        assert!(admin.groups().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_role() -> impl Strategy<Value = Role> {
            prop::sample::select(Role::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn disclosure_is_flag_or_capability(role in arb_role(), bits in 0u8..16) {
                let registry = RoleRegistry::default();
                let flags = flags_from_bits(bits);
                let p = product(flags);
                let view = resolve(&p, &viewer(role), &registry);
                let caps = registry.capabilities_for(role);
                for group in FieldGroup::ALL {
                    prop_assert_eq!(
                        view.groups().contains(group),
                        flags.get(group) || caps.contains(group)
                    );
                }
            }

            #[test]
            fn resolve_is_deterministic(role in arb_role(), bits in 0u8..16) {
                let registry = RoleRegistry::default();
                let p = product(flags_from_bits(bits));
                let v = viewer(role);
                prop_assert_eq!(resolve(&p, &v, &registry), resolve(&p, &v, &registry));
            }

            #[test]
            fn list_filter_is_all_flags_or_admin(role in arb_role(), bits in 0u8..16) {
                let p = product(flags_from_bits(bits));
                prop_assert_eq!(
                    list_visible(&p, &viewer(role)),
                    role == Role::Admin || bits == 0b1111
                );
            }
        }
    }
}
