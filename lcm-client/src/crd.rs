//! Config Connector resources consulted when bindings are declared in-cluster
//!
//! Only the fields the binding resolver reads are modelled; everything else on
//! the objects is ignored on deserialization.
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Partial IAM policy on a cloud resource, as declared through Config Connector
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "iam.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "IAMPartialPolicy",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IAMPartialPolicySpec {
    /// The resource the bindings apply to
    pub resource_ref: ResourceRef,
    /// Role bindings merged into the resource's policy
    #[serde(default)]
    pub bindings: Vec<PolicyBinding>,
}

/// Reference from a policy to the resource it governs
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Kind of the referenced resource, e.g. `IAMServiceAccount`
    pub kind: String,
    /// API version of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Name of an in-cluster resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace of an in-cluster resource, defaults to the policy's own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Identifier of a resource not managed in-cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

/// A role and the members it is granted to
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PolicyBinding {
    /// Role name
    pub role: String,
    /// Granted members
    #[serde(default)]
    pub members: Vec<PolicyMember>,
}

/// A single member of a [`PolicyBinding`]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMember {
    /// IAM principal, e.g. `serviceAccount:p.svc.id.goog[ns/ksa]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
}

impl IAMPartialPolicy {
    /// Whether `member` is granted `role` by this policy
    pub fn grants(&self, role: &str, member: &str) -> bool {
        self.spec
            .bindings
            .iter()
            .filter(|b| b.role == role)
            .flat_map(|b| &b.members)
            .any(|m| m.member.as_deref() == Some(member))
    }
}

/// A Google service account managed through Config Connector
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "iam.cnrm.cloud.google.com",
    version = "v1beta1",
    kind = "IAMServiceAccount",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IAMServiceAccountSpec {
    /// Account id, defaults to the object name
    #[serde(rename = "resourceID", default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}
