//! IAM policy model and the principals workload identity is expressed in
//!
//! The shapes follow the IAM REST representation so they can be exchanged with
//! the cloud backend without conversion.
use serde::{Deserialize, Serialize};

/// Role letting a Kubernetes service account impersonate a cloud identity.
pub const WORKLOAD_IDENTITY_USER_ROLE: &str = "roles/iam.workloadIdentityUser";
/// Role allowing a principal to mint tokens for a cloud identity.
pub const TOKEN_CREATOR_ROLE: &str = "roles/iam.serviceAccountTokenCreator";
/// Permission needed to mint access tokens for a cloud identity.
pub const GET_ACCESS_TOKEN_PERMISSION: &str = "iam.serviceAccounts.getAccessToken";

/// Domain suffix of managed service-account emails.
pub const SERVICE_ACCOUNT_DOMAIN: &str = "iam.gserviceaccount.com";
const SERVICE_ACCOUNT_SUFFIX: &str = "gserviceaccount.com";
/// Suffix of the workload identity pool of a project.
pub const IDENTITY_POOL_SUFFIX: &str = "svc.id.goog";

/// An IAM policy attached to a resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    /// Concurrency token, must be sent back unchanged on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Role bindings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
}

/// Grants a role to a set of members
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Role name, e.g. `roles/iam.workloadIdentityUser`
    pub role: String,
    /// Principals, e.g. `serviceAccount:a@b.iam.gserviceaccount.com`
    #[serde(default)]
    pub members: Vec<String>,
    /// Optional CEL condition, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl Policy {
    /// All members granted `role`
    pub fn members<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.bindings
            .iter()
            .filter(move |b| b.role == role)
            .flat_map(|b| b.members.iter().map(String::as_str))
    }

    /// Whether `member` is granted `role`
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.members(role).any(|m| m == member)
    }

    /// Grant `role` to `member`
    ///
    /// Extends the unconditional binding for the role if there is one. Returns
    /// `false` when the member already held the role.
    pub fn add(&mut self, member: &str, role: &str) -> bool {
        if self
            .bindings
            .iter()
            .any(|b| b.role == role && b.condition.is_none() && b.members.iter().any(|m| m == member))
        {
            return false;
        }
        match self
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.condition.is_none())
        {
            Some(binding) => binding.members.push(member.to_owned()),
            None => self.bindings.push(Binding {
                role: role.to_owned(),
                members: vec![member.to_owned()],
                condition: None,
            }),
        }
        true
    }
}

/// The member string a Kubernetes service account appears as in IAM
///
/// ```
/// use lcm_core::iam::workload_identity_member;
/// assert_eq!(
///     workload_identity_member("proj", "ns", "ksa"),
///     "serviceAccount:proj.svc.id.goog[ns/ksa]"
/// );
/// ```
pub fn workload_identity_member(project_id: &str, namespace: &str, ksa: &str) -> String {
    format!("serviceAccount:{project_id}.{IDENTITY_POOL_SUFFIX}[{namespace}/{ksa}]")
}

/// Prefix an authenticated email with its IAM principal type
pub fn principal_for(email: &str) -> String {
    if email.ends_with(SERVICE_ACCOUNT_SUFFIX) {
        format!("serviceAccount:{email}")
    } else {
        format!("user:{email}")
    }
}

/// Resource name of a service account, with the project wildcard
pub fn service_account_resource(email: &str) -> String {
    format!("projects/-/serviceAccounts/{email}")
}

/// Email of the service account `account_id` in `project_id`
pub fn service_account_email(account_id: &str, project_id: &str) -> String {
    format!("{account_id}@{project_id}.{SERVICE_ACCOUNT_DOMAIN}")
}

/// The cloud project owning the cluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Resource name, `projects/<number>`
    pub name: String,
    /// Globally unique project id
    pub project_id: String,
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Project {
    /// The numeric project id
    pub fn numeric_id(&self) -> &str {
        self.name.strip_prefix("projects/").unwrap_or(&self.name)
    }
}
