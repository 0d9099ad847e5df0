//! # Product Records
//!
//! A product carries an always-public core (name, batch id, certification,
//! creation time, ledger reference hash) and four optional field groups.
//! Each group has a per-record override flag that discloses it to every
//! viewer regardless of role.
//!
//! Ledger fields (`blockchain_hash`, `blockchain_network`) are opaque strings
//! persisted and returned verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::error::{check_len, require_text, CoreError};
use crate::profile::DEFAULT_NETWORK;
use crate::role::{CapabilitySet, FieldGroup};

const MAX_NAME: usize = 200;
const MAX_BATCH_ID: usize = 100;
const MAX_LOCATION: usize = 500;
const MAX_PRODUCER: usize = 200;
const MAX_HASH: usize = 66;
const MAX_NETWORK: usize = 50;

// ── Certification ───────────────────────────────────────────────────────────

/// Product certification type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Certification {
    Organic,
    FairTrade,
    RainforestAlliance,
    CarbonNeutral,
    Sustainable,
    RegenerativeOrganic,
    #[default]
    None,
}

impl Certification {
    const ALL: [Certification; 7] = [
        Self::Organic,
        Self::FairTrade,
        Self::RainforestAlliance,
        Self::CarbonNeutral,
        Self::Sustainable,
        Self::RegenerativeOrganic,
        Self::None,
    ];

    /// Wire name of the certification.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::FairTrade => "fair-trade",
            Self::RainforestAlliance => "rainforest-alliance",
            Self::CarbonNeutral => "carbon-neutral",
            Self::Sustainable => "sustainable",
            Self::RegenerativeOrganic => "regenerative-organic",
            Self::None => "none",
        }
    }

    /// Parse a certification name. Blank input means [`Certification::None`].
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::None);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownCertification(s.to_string()))
    }
}

impl std::fmt::Display for Certification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Override flags ──────────────────────────────────────────────────────────

/// Per-record override flags. A `true` flag discloses its group to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupFlags {
    #[serde(rename = "is_sensitive_data_public")]
    pub sensitive: bool,
    #[serde(rename = "is_producer_details_public")]
    pub producer: bool,
    #[serde(rename = "is_iot_data_public")]
    pub iot: bool,
    #[serde(rename = "is_carbon_details_public")]
    pub carbon: bool,
}

impl GroupFlags {
    /// Every group disclosed.
    pub const fn all_public() -> Self {
        Self {
            sensitive: true,
            producer: true,
            iot: true,
            carbon: true,
        }
    }

    /// Every group withheld.
    pub const fn all_private() -> Self {
        Self {
            sensitive: false,
            producer: false,
            iot: false,
            carbon: false,
        }
    }

    /// The flag for `group`.
    pub fn get(&self, group: FieldGroup) -> bool {
        match group {
            FieldGroup::Sensitive => self.sensitive,
            FieldGroup::Producer => self.producer,
            FieldGroup::Iot => self.iot,
            FieldGroup::Carbon => self.carbon,
        }
    }

    /// Whether every flag is set.
    pub fn is_fully_public(&self) -> bool {
        FieldGroup::ALL.into_iter().all(|g| self.get(g))
    }

    /// The flagged groups as a set.
    pub fn as_set(&self) -> CapabilitySet {
        CapabilitySet::from_groups(FieldGroup::ALL.into_iter().filter(|g| self.get(*g)))
    }
}

impl Default for GroupFlags {
    /// Product creation discloses every group unless told otherwise.
    fn default() -> Self {
        Self::all_public()
    }
}

// ── Product ─────────────────────────────────────────────────────────────────

/// A traceable product batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub batch_id: String,
    pub certification: Certification,
    pub location: String,
    pub description: String,
    pub producer: String,
    pub iot_data: String,
    pub carbon_activity: String,
    #[serde(flatten)]
    pub flags: GroupFlags,
    pub blockchain_hash: String,
    pub blockchain_network: String,
    /// Profile that created the product.
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for [`Product::create`].
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub batch_id: String,
    pub certification: Certification,
    pub location: String,
    pub description: String,
    pub producer: String,
    pub iot_data: String,
    pub carbon_activity: String,
    pub flags: GroupFlags,
    pub blockchain_hash: String,
    pub blockchain_network: Option<String>,
}

/// Partial update applied by [`Product::apply`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub batch_id: Option<String>,
    pub certification: Option<Certification>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub producer: Option<String>,
    pub iot_data: Option<String>,
    pub carbon_activity: Option<String>,
    pub is_sensitive_data_public: Option<bool>,
    pub is_producer_details_public: Option<bool>,
    pub is_iot_data_public: Option<bool>,
    pub is_carbon_details_public: Option<bool>,
    pub blockchain_hash: Option<String>,
}

impl Product {
    /// Create a product owned by `created_by`.
    pub fn create(input: NewProduct, created_by: Uuid) -> Result<Self, CoreError> {
        let now = clock::now();
        let product = Self {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            batch_id: input.batch_id.trim().to_string(),
            certification: input.certification,
            location: input.location,
            description: input.description,
            producer: input.producer,
            iot_data: input.iot_data,
            carbon_activity: input.carbon_activity,
            flags: input.flags,
            blockchain_hash: input.blockchain_hash,
            blockchain_network: input
                .blockchain_network
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            created_by,
            created_at: now,
            updated_at: now,
        };
        product.validate()?;
        Ok(product)
    }

    /// Check every field constraint.
    pub fn validate(&self) -> Result<(), CoreError> {
        require_text(&self.name, "name", MAX_NAME)?;
        require_text(&self.batch_id, "batch_id", MAX_BATCH_ID)?;
        check_len(&self.location, "location", MAX_LOCATION)?;
        check_len(&self.producer, "producer", MAX_PRODUCER)?;
        check_len(&self.blockchain_hash, "blockchain_hash", MAX_HASH)?;
        require_text(&self.blockchain_network, "blockchain_network", MAX_NETWORK)?;
        Ok(())
    }

    /// Apply a patch, returning the names of the fields that changed.
    ///
    /// The product is left untouched if the patched result fails validation.
    pub fn apply(&mut self, patch: ProductPatch) -> Result<Vec<&'static str>, CoreError> {
        let mut next = self.clone();
        let mut changed = Vec::new();

        macro_rules! set {
            ($field:ident, $name:literal) => {
                if let Some(v) = patch.$field {
                    if next.$field != v {
                        next.$field = v;
                        changed.push($name);
                    }
                }
            };
        }
        macro_rules! set_flag {
            ($patch:ident, $flag:ident) => {
                if let Some(v) = patch.$patch {
                    if next.flags.$flag != v {
                        next.flags.$flag = v;
                        changed.push(stringify!($patch));
                    }
                }
            };
        }

        set!(name, "name");
        set!(batch_id, "batch_id");
        set!(certification, "certification");
        set!(location, "location");
        set!(description, "description");
        set!(producer, "producer");
        set!(iot_data, "iot_data");
        set!(carbon_activity, "carbon_activity");
        set!(blockchain_hash, "blockchain_hash");
        set_flag!(is_sensitive_data_public, sensitive);
        set_flag!(is_producer_details_public, producer);
        set_flag!(is_iot_data_public, iot);
        set_flag!(is_carbon_details_public, carbon);

        next.name = next.name.trim().to_string();
        next.batch_id = next.batch_id.trim().to_string();
        next.validate()?;
        if !changed.is_empty() {
            next.updated_at = clock::advance(self.updated_at);
        }
        *self = next;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_input() -> NewProduct {
        NewProduct {
            name: "Arabica Beans".into(),
            batch_id: "BATCH-001".into(),
            certification: Certification::Organic,
            location: "Huila, Colombia".into(),
            description: "Shade-grown".into(),
            producer: "Finca La Esperanza".into(),
            iot_data: "{\"soil_moisture\":0.31}".into(),
            carbon_activity: "Agroforestry".into(),
            flags: GroupFlags::default(),
            blockchain_hash: "0xdeadbeef".into(),
            blockchain_network: None,
        }
    }

    #[test]
    fn create_applies_defaults() {
        let p = Product::create(sample_input(), Uuid::new_v4()).unwrap();
        assert_eq!(p.blockchain_network, DEFAULT_NETWORK);
        assert!(p.flags.is_fully_public());
        assert_eq!(p.created_at, p.updated_at);
    }

    #[test]
    fn create_rejects_missing_name() {
        let input = NewProduct {
            name: "  ".into(),
            ..sample_input()
        };
        assert_eq!(
            Product::create(input, Uuid::new_v4()),
            Err(CoreError::MissingField { field: "name" })
        );
    }

    #[test]
    fn create_rejects_missing_batch_id() {
        let input = NewProduct {
            batch_id: String::new(),
            ..sample_input()
        };
        assert!(Product::create(input, Uuid::new_v4()).is_err());
    }

    #[test]
    fn create_rejects_oversized_hash() {
        let input = NewProduct {
            blockchain_hash: "f".repeat(67),
            ..sample_input()
        };
        assert_eq!(
            Product::create(input, Uuid::new_v4()),
            Err(CoreError::FieldTooLong {
                field: "blockchain_hash",
                max: 66
            })
        );
    }

    #[test]
    fn certification_parse() {
        assert_eq!(Certification::parse("fair-trade").unwrap(), Certification::FairTrade);
        assert_eq!(Certification::parse("ORGANIC").unwrap(), Certification::Organic);
        assert_eq!(Certification::parse("").unwrap(), Certification::None);
        assert!(Certification::parse("biodynamic").is_err());
    }

    #[test]
    fn certification_serde_kebab_case() {
        let json = serde_json::to_string(&Certification::RegenerativeOrganic).unwrap();
        assert_eq!(json, "\"regenerative-organic\"");
    }

    #[test]
    fn flags_serialize_with_record_names() {
        let flags = GroupFlags {
            sensitive: true,
            producer: false,
            iot: true,
            carbon: false,
        };
        let v = serde_json::to_value(flags).unwrap();
        assert_eq!(v["is_sensitive_data_public"], true);
        assert_eq!(v["is_producer_details_public"], false);
        assert_eq!(flags.as_set().groups(), vec![FieldGroup::Sensitive, FieldGroup::Iot]);
        assert!(!flags.is_fully_public());
    }

    #[test]
    fn apply_reports_changed_fields() {
        let mut p = Product::create(sample_input(), Uuid::new_v4()).unwrap();
        let changed = p
            .apply(ProductPatch {
                location: Some("Nariño".into()),
                producer: Some(p.producer.clone()),
                is_iot_data_public: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(changed, vec!["location", "is_iot_data_public"]);
        assert_eq!(p.location, "Nariño");
        assert!(!p.flags.iot);
    }

    #[test]
    fn every_change_advances_updated_at() {
        let mut p = Product::create(sample_input(), Uuid::new_v4()).unwrap();
        let created = p.updated_at;
        p.apply(ProductPatch {
            location: Some("Cauca".into()),
            ..Default::default()
        })
        .unwrap();
        let first = p.updated_at;
        p.apply(ProductPatch {
            location: Some("Tolima".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(created < first && first < p.updated_at);

        let unchanged = p.updated_at;
        p.apply(ProductPatch::default()).unwrap();
        assert_eq!(p.updated_at, unchanged);
    }

    #[test]
    fn apply_is_atomic_on_validation_failure() {
        let mut p = Product::create(sample_input(), Uuid::new_v4()).unwrap();
        let before = p.clone();
        let result = p.apply(ProductPatch {
            location: Some("elsewhere".into()),
            name: Some(String::new()),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn product_serializes_flags_flat() {
        let p = Product::create(sample_input(), Uuid::new_v4()).unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["is_carbon_details_public"], true);
        assert!(v.get("flags").is_none());
        let back: Product = serde_json::from_value(v).unwrap();
        assert_eq!(back, p);
    }
}
