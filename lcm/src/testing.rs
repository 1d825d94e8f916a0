//! In-memory backends for engine and route tests
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::{
    api::core::v1::{Pod, PodSpec, PodStatus, Secret, Service, ServiceAccount, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use lcm_client::{
    crd::{IAMPartialPolicy, IAMServiceAccount},
    gcp::CloudServiceAccount,
    CloudBackend, Error as BackendError, GoogleErrorResponse, KubeBackend, Result,
};
use lcm_core::{
    iam::{GET_ACCESS_TOKEN_PERMISSION, WORKLOAD_IDENTITY_USER_ROLE},
    metadata::GSA_ANNOTATION,
    AccessToken, Policy, Project,
};
use parking_lot::Mutex;
use secrecy::SecretString;

use crate::token::Clock;

fn unavailable() -> BackendError {
    BackendError::Api(GoogleErrorResponse {
        code: 503,
        message: "backend unavailable".into(),
        status: "UNAVAILABLE".into(),
    })
}

fn not_found(what: &str) -> BackendError {
    BackendError::Api(GoogleErrorResponse {
        code: 404,
        message: format!("{what} not found"),
        status: "NOT_FOUND".into(),
    })
}

/// A running pod at `ip`
pub fn pod(name: &str, namespace: &str, ip: &str, ksa: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            service_account_name: ksa.map(Into::into),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some(ip.into()),
            phase: Some("Running".into()),
            ..PodStatus::default()
        }),
    }
}

/// A Kubernetes service account, optionally annotated with a cloud identity
pub fn service_account(namespace: &str, name: &str, gsa: Option<&str>) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            annotations: gsa.map(|email| BTreeMap::from([(GSA_ANNOTATION.to_owned(), email.to_owned())])),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    }
}

/// A policy granting the workload identity role to `members`
pub fn workload_identity_policy(members: &[&str]) -> Policy {
    let mut policy = Policy::default();
    for member in members {
        policy.add(member, WORKLOAD_IDENTITY_USER_ROLE);
    }
    policy
}

/// A settable clock starting at 2024-01-01T12:00:00Z
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl Default for TestClock {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )))
    }
}

impl TestClock {
    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock() += by;
    }

    pub fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock())
    }
}

#[derive(Default)]
pub struct FakeKube {
    pods: Mutex<Vec<Pod>>,
    service_accounts: Mutex<HashMap<(String, String), ServiceAccount>>,
    partial_policies: Mutex<Vec<IAMPartialPolicy>>,
    iam_service_accounts: Mutex<HashMap<(String, String), IAMServiceAccount>>,
    services: Mutex<HashMap<(String, String), Service>>,
    applied: Mutex<Vec<Secret>>,
    pod_lookups: AtomicUsize,
    fail_pods: AtomicBool,
    fail_secrets: AtomicBool,
}

impl FakeKube {
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().push(pod);
    }

    pub fn add_service_account(&self, sa: ServiceAccount) {
        let key = (
            sa.metadata.namespace.clone().unwrap_or_default(),
            sa.metadata.name.clone().unwrap_or_default(),
        );
        self.service_accounts.lock().insert(key, sa);
    }

    pub fn add_partial_policy(&self, policy: IAMPartialPolicy) {
        self.partial_policies.lock().push(policy);
    }

    pub fn add_iam_service_account(&self, sa: IAMServiceAccount) {
        let key = (
            sa.metadata.namespace.clone().unwrap_or_default(),
            sa.metadata.name.clone().unwrap_or_default(),
        );
        self.iam_service_accounts.lock().insert(key, sa);
    }

    pub fn add_service(&self, namespace: &str, name: &str, cluster_ip: &str) {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.into()),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        self.services.lock().insert((namespace.into(), name.into()), svc);
    }

    pub fn fail_pod_lookups(&self) {
        self.fail_pods.store(true, Ordering::SeqCst);
    }

    pub fn fail_secret_writes(&self) {
        self.fail_secrets.store(true, Ordering::SeqCst);
    }

    pub fn pod_lookups(&self) -> usize {
        self.pod_lookups.load(Ordering::SeqCst)
    }

    pub fn applied_secrets(&self) -> Vec<Secret> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl KubeBackend for FakeKube {
    async fn pods_with_ip(&self, ip: &str) -> Result<Vec<Pod>> {
        self.pod_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_pods.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|p| p.status.as_ref().and_then(|s| s.pod_ip.as_deref()) == Some(ip))
            .cloned()
            .collect())
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>> {
        Ok(self
            .service_accounts
            .lock()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn partial_policies(&self, namespace: Option<&str>) -> Result<Vec<IAMPartialPolicy>> {
        Ok(self
            .partial_policies
            .lock()
            .iter()
            .filter(|p| namespace.is_none() || p.metadata.namespace.as_deref() == namespace)
            .cloned()
            .collect())
    }

    async fn iam_service_account(&self, namespace: &str, name: &str) -> Result<Option<IAMServiceAccount>> {
        Ok(self
            .iam_service_accounts
            .lock()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<Secret> {
        if self.fail_secrets.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.applied.lock().push(secret.clone());
        Ok(secret.clone())
    }

    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .services
            .lock()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }
}

pub struct FakeCloud {
    clock: TestClock,
    caller: String,
    project: Mutex<Option<Project>>,
    policies: Mutex<HashMap<String, Policy>>,
    broken_policies: Mutex<HashSet<String>>,
    permitted: Mutex<HashSet<String>>,
    accounts: Mutex<Vec<CloudServiceAccount>>,
    mints: AtomicUsize,
    id_mints: AtomicUsize,
    policy_writes: AtomicUsize,
    permission_tests: AtomicUsize,
    fail_mints: AtomicBool,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::with_clock(TestClock::default())
    }
}

impl FakeCloud {
    /// A cloud whose minted tokens expire relative to `clock`
    pub fn with_clock(clock: TestClock) -> Self {
        Self {
            clock,
            caller: "lcm@project.iam.gserviceaccount.com".into(),
            project: Mutex::new(Some(Project {
                name: "projects/424242".into(),
                project_id: "project".into(),
                display_name: Some("Project".into()),
            })),
            policies: Mutex::default(),
            broken_policies: Mutex::default(),
            permitted: Mutex::default(),
            accounts: Mutex::default(),
            mints: AtomicUsize::new(0),
            id_mints: AtomicUsize::new(0),
            policy_writes: AtomicUsize::new(0),
            permission_tests: AtomicUsize::new(0),
            fail_mints: AtomicBool::new(false),
        }
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn set_project(&self, project: Option<Project>) {
        *self.project.lock() = project;
    }

    pub fn set_policy(&self, email: &str, policy: Policy) {
        self.policies.lock().insert(email.into(), policy);
    }

    pub fn policy(&self, email: &str) -> Option<Policy> {
        self.policies.lock().get(email).cloned()
    }

    pub fn break_policy(&self, email: &str) {
        self.broken_policies.lock().insert(email.into());
    }

    pub fn permit(&self, email: &str) {
        self.permitted.lock().insert(email.into());
    }

    pub fn add_account(&self, email: &str) {
        self.accounts.lock().push(CloudServiceAccount {
            name: format!("projects/project/serviceAccounts/{email}"),
            email: email.into(),
            ..CloudServiceAccount::default()
        });
    }

    pub fn fail_mints(&self) {
        self.fail_mints.store(true, Ordering::SeqCst);
    }

    pub fn mints(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }

    pub fn id_mints(&self) -> usize {
        self.id_mints.load(Ordering::SeqCst)
    }

    pub fn policy_writes(&self) -> usize {
        self.policy_writes.load(Ordering::SeqCst)
    }

    pub fn permission_tests(&self) -> usize {
        self.permission_tests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudBackend for FakeCloud {
    async fn search_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.project.lock().clone().filter(|p| p.project_id == project_id))
    }

    async fn get_iam_policy(&self, email: &str) -> Result<Policy> {
        if self.broken_policies.lock().contains(email) {
            return Err(unavailable());
        }
        Ok(self.policies.lock().get(email).cloned().unwrap_or_default())
    }

    async fn set_iam_policy(&self, email: &str, policy: &Policy) -> Result<Policy> {
        self.policy_writes.fetch_add(1, Ordering::SeqCst);
        if self.broken_policies.lock().contains(email) {
            return Err(unavailable());
        }
        let granted = policy
            .members(lcm_core::iam::TOKEN_CREATOR_ROLE)
            .any(|m| m.ends_with(&self.caller));
        self.policies.lock().insert(email.into(), policy.clone());
        if granted {
            self.permitted.lock().insert(email.into());
        }
        Ok(policy.clone())
    }

    async fn test_iam_permissions(&self, email: &str, permissions: &[&str]) -> Result<Vec<String>> {
        self.permission_tests.fetch_add(1, Ordering::SeqCst);
        if !self.permitted.lock().contains(email) {
            return Ok(vec![]);
        }
        Ok(permissions
            .iter()
            .filter(|p| **p == GET_ACCESS_TOKEN_PERMISSION)
            .map(|p| (*p).to_owned())
            .collect())
    }

    async fn generate_access_token(
        &self,
        email: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<AccessToken> {
        if self.fail_mints.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if !self.permitted.lock().contains(email) {
            return Err(not_found(email));
        }
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        let lifetime = chrono::Duration::from_std(lifetime).unwrap();
        Ok(AccessToken {
            token: format!("ya29.{n}.{}", scopes.join(" ")),
            expires_at: self.clock.now() + lifetime,
        })
    }

    async fn generate_id_token(&self, email: &str, audience: &str) -> Result<String> {
        if self.fail_mints.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let n = self.id_mints.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("eyJ.{email}.{audience}.{n}"))
    }

    async fn caller_email(&self) -> Result<String> {
        Ok(self.caller.clone())
    }

    async fn caller_access_token(&self) -> Result<SecretString> {
        Ok(SecretString::from("ya29.caller"))
    }

    async fn list_service_accounts(&self, _project_id: &str) -> Result<Vec<CloudServiceAccount>> {
        Ok(self.accounts.lock().clone())
    }
}
