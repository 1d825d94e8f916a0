//! Idempotent JSON patches against a pod spec
//!
//! A mutating webhook can be invoked several times for the same object, so
//! every addition is checked against what the pod already has, and against
//! what earlier calls on the same [`PodPatch`] have queued. Lists that do not
//! exist yet are created whole; existing lists are appended to with the `-`
//! index.
use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, EnvVar, HostAlias, PodSpec};
use serde_json::{json, Value};

/// Which container list of a pod spec a container lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// `spec.containers`
    Container,
    /// `spec.initContainers`
    InitContainer,
}

impl ContainerKind {
    /// Field name of the list in the pod spec
    pub fn field(self) -> &'static str {
        match self {
            Self::Container => "containers",
            Self::InitContainer => "initContainers",
        }
    }
}

/// Accumulates patch operations for one pod
#[derive(Clone, Debug, Default)]
pub struct PodPatch {
    pull_secrets: Vec<String>,
    host_alias_ips: Vec<String>,
    operations: Vec<PatchOperation>,
}

impl PodPatch {
    /// Start a patch against the current state of `spec`
    pub fn new(spec: &PodSpec) -> Self {
        Self {
            pull_secrets: spec
                .image_pull_secrets
                .iter()
                .flatten()
                .map(|s| s.name.clone())
                .collect(),
            host_alias_ips: spec.host_aliases.iter().flatten().map(|a| a.ip.clone()).collect(),
            operations: Vec::new(),
        }
    }

    /// Reference the pull secret `name` from the pod
    ///
    /// Returns `false` if the pod already references it.
    pub fn add_pull_secret(&mut self, name: &str) -> bool {
        if self.pull_secrets.iter().any(|s| s == name) {
            return false;
        }
        let secret = json!({ "name": name });
        if self.pull_secrets.is_empty() {
            self.add(pointer(["spec", "imagePullSecrets"]), json!([secret]));
        } else {
            self.add(pointer(["spec", "imagePullSecrets", "-"]), secret);
        }
        self.pull_secrets.push(name.to_owned());
        true
    }

    /// Add every variable of `vars` that `container` does not define yet
    pub fn add_env(&mut self, kind: ContainerKind, index: usize, container: &Container, vars: &[EnvVar]) {
        let index = index.to_string();
        let existing = container.env.as_deref().unwrap_or_default();
        if existing.is_empty() {
            if !vars.is_empty() {
                self.add(pointer(["spec", kind.field(), &index, "env"]), to_value(vars));
            }
            return;
        }
        for var in vars {
            if existing.iter().any(|e| e.name == var.name) {
                continue;
            }
            self.add(pointer(["spec", kind.field(), &index, "env", "-"]), to_value(var));
        }
    }

    /// Add every alias of `aliases` whose ip the pod does not map yet
    pub fn add_host_aliases(&mut self, aliases: &[HostAlias]) {
        let missing: Vec<&HostAlias> = aliases
            .iter()
            .filter(|a| !self.host_alias_ips.contains(&a.ip))
            .collect();
        if missing.is_empty() {
            return;
        }
        if self.host_alias_ips.is_empty() {
            self.add(pointer(["spec", "hostAliases"]), to_value(&missing));
        } else {
            for alias in &missing {
                self.add(pointer(["spec", "hostAliases", "-"]), to_value(alias));
            }
        }
        self.host_alias_ips.extend(missing.iter().map(|a| a.ip.clone()));
    }

    /// The operations queued so far
    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Consume into the queued operations
    pub fn into_operations(self) -> Vec<PatchOperation> {
        self.operations
    }

    /// Consume into a [`Patch`]
    pub fn into_patch(self) -> Patch {
        Patch(self.operations)
    }

    fn add(&mut self, path: PointerBuf, value: Value) {
        self.operations.push(PatchOperation::Add(AddOperation { path, value }));
    }
}

fn pointer<'a>(tokens: impl IntoIterator<Item = &'a str>) -> PointerBuf {
    PointerBuf::from_tokens(tokens)
}

// k8s-openapi types always serialize
fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
