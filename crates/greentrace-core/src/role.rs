//! # Role Registry
//!
//! Maps each user [`Role`] to the [`CapabilitySet`] of optional field groups
//! it may see by default, absent a record-level override.
//!
//! ## Default Table
//!
//! ```text
//! role        sensitive  producer  iot   carbon
//! public      show       show      show  show
//! private     hide       hide      hide  show
//! enterprise  hide       hide      hide  hide
//! admin       show       show      show  show
//! ```
//!
//! `public` is more permissive than `private` and `enterprise`. The table is
//! reproduced as deployed; operators who want a different policy supply a
//! YAML policy file, which is validated in full at startup so a bad policy
//! never surfaces as a request-time failure.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;

// ── Role ────────────────────────────────────────────────────────────────────

/// User roles attached to a profile.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Public user. Default role for newly provisioned wallets.
    #[default]
    Public,
    /// Private user.
    Private,
    /// Enterprise partner.
    Enterprise,
    /// Administrator or regulator.
    Admin,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 4] = [Role::Public, Role::Private, Role::Enterprise, Role::Admin];

    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Enterprise => "enterprise",
            Self::Admin => "admin",
        }
    }

    /// Whether the role bypasses the list filter and credit verification filter.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownRole(s.to_string()))
    }
}

// ── Field groups ────────────────────────────────────────────────────────────

/// A bundle of record attributes toggled together for visibility purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    /// Location and description.
    Sensitive,
    /// Producer details.
    Producer,
    /// IoT sensor data.
    Iot,
    /// Carbon-activity details.
    Carbon,
}

impl FieldGroup {
    /// Every field group, in declaration order.
    pub const ALL: [FieldGroup; 4] = [
        FieldGroup::Sensitive,
        FieldGroup::Producer,
        FieldGroup::Iot,
        FieldGroup::Carbon,
    ];

    /// Wire name of the group.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensitive => "sensitive",
            Self::Producer => "producer",
            Self::Iot => "iot",
            Self::Carbon => "carbon",
        }
    }

    /// Product attribute names belonging to this group.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::Sensitive => &["location", "description"],
            Self::Producer => &["producer"],
            Self::Iot => &["iot_data"],
            Self::Carbon => &["carbon_activity"],
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Sensitive => 1,
            Self::Producer => 1 << 1,
            Self::Iot => 1 << 2,
            Self::Carbon => 1 << 3,
        }
    }
}

impl std::fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldGroup {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownFieldGroup(s.to_string()))
    }
}

// ── Capability set ──────────────────────────────────────────────────────────

/// The set of field groups a role may view by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// No groups.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every group.
    pub const fn all() -> Self {
        Self(0b1111)
    }

    /// Build a set from an iterator of groups.
    pub fn from_groups(groups: impl IntoIterator<Item = FieldGroup>) -> Self {
        groups.into_iter().fold(Self::empty(), Self::with)
    }

    /// Return a copy with `group` added.
    pub fn with(self, group: FieldGroup) -> Self {
        Self(self.0 | group.bit())
    }

    /// Whether `group` is in the set.
    pub fn contains(&self, group: FieldGroup) -> bool {
        self.0 & group.bit() != 0
    }

    /// Groups in the set, in declaration order.
    pub fn groups(&self) -> Vec<FieldGroup> {
        FieldGroup::ALL
            .into_iter()
            .filter(|g| self.contains(*g))
            .collect()
    }

    /// Number of groups in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.groups().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let groups = Vec::<FieldGroup>::deserialize(deserializer)?;
        Ok(Self::from_groups(groups))
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Errors loading a role policy. Only ever raised at startup.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The policy file could not be read.
    #[error("failed to read role policy {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The policy file is not valid YAML for the expected shape.
    #[error("failed to parse role policy: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A role or group name in the policy is unknown.
    #[error("invalid role policy: {0}")]
    Invalid(#[from] CoreError),

    /// The policy leaves a role without an entry.
    #[error("role policy has no entry for role '{0}'")]
    MissingRole(Role),
}

/// On-disk shape of a role policy file.
///
/// ```yaml
/// roles:
///   public: [sensitive, producer, iot, carbon]
///   private: [carbon]
///   enterprise: []
///   admin: [sensitive, producer, iot, carbon]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RolePolicyFile {
    /// Role name → group names.
    pub roles: BTreeMap<String, Vec<String>>,
}

/// Table lookup from role to default capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRegistry {
    table: HashMap<Role, CapabilitySet>,
}

impl RoleRegistry {
    /// Build a registry from an explicit table. Every role must be present.
    pub fn from_table(table: HashMap<Role, CapabilitySet>) -> Result<Self, RegistryError> {
        if let Some(missing) = Role::ALL.into_iter().find(|r| !table.contains_key(r)) {
            return Err(RegistryError::MissingRole(missing));
        }
        Ok(Self { table })
    }

    /// Build a registry from a parsed policy file.
    pub fn from_policy(policy: &RolePolicyFile) -> Result<Self, RegistryError> {
        let mut table = HashMap::new();
        for (role_name, group_names) in &policy.roles {
            let role: Role = role_name.parse()?;
            let groups = group_names
                .iter()
                .map(|g| g.parse::<FieldGroup>())
                .collect::<Result<Vec<_>, _>>()?;
            table.insert(role, CapabilitySet::from_groups(groups));
        }
        Self::from_table(table)
    }

    /// Parse a registry from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, RegistryError> {
        let policy: RolePolicyFile = serde_yaml::from_str(text)?;
        Self::from_policy(&policy)
    }

    /// Load a registry from a YAML file on disk.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_yaml(&text)?;
        tracing::info!(path = %path.display(), "loaded role policy");
        Ok(registry)
    }

    /// Default capability set for `role`.
    pub fn capabilities_for(&self, role: Role) -> CapabilitySet {
        // Construction guarantees every role is present.
        self.table.get(&role).copied().unwrap_or_default()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        use FieldGroup::*;
        let table = HashMap::from([
            (Role::Public, CapabilitySet::all()),
            (Role::Private, CapabilitySet::from_groups([Carbon])),
            (Role::Enterprise, CapabilitySet::empty()),
            (Role::Admin, CapabilitySet::all()),
        ]);
        Self { table }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_table_matches_deployed_policy() {
        let reg = RoleRegistry::default();
        assert_eq!(reg.capabilities_for(Role::Public), CapabilitySet::all());
        assert_eq!(
            reg.capabilities_for(Role::Private).groups(),
            vec![FieldGroup::Carbon]
        );
        assert!(reg.capabilities_for(Role::Enterprise).is_empty());
        assert_eq!(reg.capabilities_for(Role::Admin), CapabilitySet::all());
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn role_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Enterprise).unwrap(), "\"enterprise\"");
        let r: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(r, Role::Admin);
    }

    #[test]
    fn only_admin_is_privileged() {
        assert!(Role::Admin.is_privileged());
        assert!(!Role::Public.is_privileged());
        assert!(!Role::Private.is_privileged());
        assert!(!Role::Enterprise.is_privileged());
    }

    #[test]
    fn capability_set_operations() {
        let set = CapabilitySet::empty()
            .with(FieldGroup::Iot)
            .with(FieldGroup::Sensitive);
        assert!(set.contains(FieldGroup::Iot));
        assert!(!set.contains(FieldGroup::Carbon));
        assert_eq!(set.len(), 2);
        assert_eq!(set.groups(), vec![FieldGroup::Sensitive, FieldGroup::Iot]);
        assert_eq!(CapabilitySet::all().len(), 4);
    }

    #[test]
    fn capability_set_serializes_as_group_list() {
        let set = CapabilitySet::from_groups([FieldGroup::Carbon, FieldGroup::Producer]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["producer","carbon"]"#);
        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn field_group_fields() {
        assert_eq!(FieldGroup::Sensitive.fields(), &["location", "description"]);
        assert_eq!(FieldGroup::Iot.fields(), &["iot_data"]);
    }

    #[test]
    fn yaml_policy_overrides_table() {
        let yaml = r#"
roles:
  public: []
  private: [carbon]
  enterprise: [producer, carbon]
  admin: [sensitive, producer, iot, carbon]
"#;
        let reg = RoleRegistry::from_yaml(yaml).unwrap();
        assert!(reg.capabilities_for(Role::Public).is_empty());
        assert_eq!(
            reg.capabilities_for(Role::Enterprise).groups(),
            vec![FieldGroup::Producer, FieldGroup::Carbon]
        );
    }

    #[test]
    fn yaml_policy_missing_role_fails() {
        let yaml = "roles:\n  public: []\n  private: []\n  admin: []\n";
        match RoleRegistry::from_yaml(yaml) {
            Err(RegistryError::MissingRole(Role::Enterprise)) => {}
            other => panic!("expected MissingRole(enterprise), got {other:?}"),
        }
    }

    #[test]
    fn yaml_policy_unknown_role_fails() {
        let yaml = "roles:\n  public: []\n  private: []\n  enterprise: []\n  admin: []\n  root: []\n";
        assert!(matches!(
            RoleRegistry::from_yaml(yaml),
            Err(RegistryError::Invalid(CoreError::UnknownRole(_)))
        ));
    }

    #[test]
    fn yaml_policy_unknown_group_fails() {
        let yaml = "roles:\n  public: [gps]\n  private: []\n  enterprise: []\n  admin: []\n";
        assert!(matches!(
            RoleRegistry::from_yaml(yaml),
            Err(RegistryError::Invalid(CoreError::UnknownFieldGroup(_)))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "roles:\n  public: [iot]\n  private: []\n  enterprise: []\n  admin: [sensitive]"
        )
        .unwrap();
        let reg = RoleRegistry::load(file.path()).unwrap();
        assert_eq!(reg.capabilities_for(Role::Public).groups(), vec![FieldGroup::Iot]);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = RoleRegistry::load(Path::new("/nonexistent/policy.yaml")).unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }
}
