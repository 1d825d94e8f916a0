//! Shared request state and the HTTP surface
use std::sync::Arc;

use axum::Router;
use lcm_client::{CloudBackend, KubeBackend};
use tower_http::trace::TraceLayer;

use crate::{
    cluster::ProjectCache,
    config::Config,
    guardian::PermissionGuardian,
    locator::WorkloadLocator,
    metadata,
    resolver::{resolver_for, Bindings},
    token::{system_clock, Clock, TokenMinter},
    webhook::{self, PodMutator},
};

/// Everything a request handler needs
///
/// Built once at startup; every cache inside lives as long as the process.
pub struct Context {
    /// Process configuration
    pub config: Config,
    /// Caller lookup by source address
    pub locator: WorkloadLocator,
    /// Service account to cloud identity bindings
    pub bindings: Bindings,
    /// Token issuance
    pub minter: TokenMinter,
    /// The configured cloud project
    pub project: ProjectCache,
    /// Admission patching
    pub mutator: PodMutator,
}

impl Context {
    /// Wire the engine onto `kube` and `cloud`, rewiring pods to `service_ip`
    pub fn new(
        config: Config,
        kube: Arc<dyn KubeBackend>,
        cloud: Arc<dyn CloudBackend>,
        service_ip: &str,
    ) -> Self {
        Self::with_clock(config, kube, cloud, service_ip, system_clock())
    }

    /// As [`Context::new`], reading the time from `clock`
    pub fn with_clock(
        config: Config,
        kube: Arc<dyn KubeBackend>,
        cloud: Arc<dyn CloudBackend>,
        service_ip: &str,
        clock: Clock,
    ) -> Self {
        let resolver = resolver_for(config.ksa_resolver, &config.project_id, kube.clone(), cloud.clone());
        let guardian = PermissionGuardian::new(cloud.clone());
        Self {
            locator: WorkloadLocator::new(kube.clone()),
            bindings: Bindings::new(resolver),
            minter: TokenMinter::new(cloud.clone(), guardian, clock),
            project: ProjectCache::new(&config.project_id, cloud.clone()),
            mutator: PodMutator::new(kube, cloud, config.metadata_type, service_ip),
            config,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        kube: Arc<crate::testing::FakeKube>,
        cloud: Arc<crate::testing::FakeCloud>,
    ) -> Arc<Self> {
        Arc::new(Self::new(Config::for_project("project"), kube, cloud, "10.96.0.53"))
    }
}

/// The metadata tree and the admission webhook
///
/// Serve with [`Router::into_make_service_with_connect_info`], the metadata
/// routes identify callers by their address.
pub fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .merge(metadata::router())
        .merge(webhook::router())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
