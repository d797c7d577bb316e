//! Resource model for rotated instances and their parents.
//!
//! A [`Parent`] carries a template whose rule hosts contain the
//! [`RANDOM_PLACEHOLDER`](crate::RANDOM_PLACEHOLDER) token. Concrete
//! [`Instance`]s are stamped out of that template, one random value at a time.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind reported in owner references pointing at a parent.
pub const PARENT_KIND: &str = "RandomIngress";

/// Kind used when reporting store errors about instances.
pub const INSTANCE_KIND: &str = "Ingress";

// =============================================================================
// Parent
// =============================================================================

/// Namespaced name identifying a parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParentKey {
    pub namespace: String,
    pub name: String,
}

impl ParentKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A parent object as stored: identity, desired template and observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub key: ParentKey,
    pub uid: Uuid,
    pub spec: ParentSpec,
    #[serde(default)]
    pub status: ObservedStatus,
}

impl Parent {
    /// Owner reference to stamp onto instances generated from this parent.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: PARENT_KIND.to_string(),
            name: self.key.name.clone(),
            uid: self.uid,
            controller: true,
            block_owner_deletion: true,
        }
    }
}

/// Desired state of a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentSpec {
    pub template: InstanceTemplate,
}

/// Template used to instantiate instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    /// Metadata copied verbatim onto every generated instance.
    #[serde(default)]
    pub metadata: TemplateMetadata,

    /// Instance body. Rule hosts are templated.
    #[serde(default)]
    pub spec: InstanceSpec,
}

/// Vetted subset of metadata that a template may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Body of an instance (and of the template it was rendered from).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Host rule. `host` is the templated field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRuleValue>,
}

impl Rule {
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            http: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRuleValue {
    pub paths: Vec<HttpPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPath {
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_path_type")]
    pub path_type: String,

    pub backend: Backend,
}

fn default_path_type() -> String {
    "Prefix".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub service_name: String,
    pub service_port: u16,
}

// =============================================================================
// Instance
// =============================================================================

/// Back-reference from a generated instance to the parent controlling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

/// A concrete, fully substituted instance.
///
/// Names follow `<parent>-<specHash>-<suffix>`. Instances are never updated in
/// place; they are created and later deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub namespace: String,
    pub creation_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    pub owner: OwnerReference,
    pub spec: InstanceSpec,
}

impl Instance {
    /// Returns true if `parent` is the controlling owner of this instance.
    pub fn is_owned_by(&self, parent: &Parent) -> bool {
        self.owner.controller && self.owner.uid == parent.uid
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state reported on a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    /// At most one entry per condition type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// When the currently alive instance is due for replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_renewal_time: Option<DateTime<Utc>>,
}

impl ObservedStatus {
    /// Look up the condition of the given type.
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Condition types a parent can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The parent spec passes validation.
    Valid,

    /// The managed instance is being changed. Reserved; not produced yet.
    Progressing,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("Valid"),
            Self::Progressing => f.write_str("Progressing"),
        }
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One typed observation about a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_heartbeat_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}
