pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod registry;
pub mod resources;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile, reconcile_restart,
    restart_error_policy,
};
pub use crd::{Dogu, DoguRestart};
pub use health::{HealthState, Metrics};

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::runtime::controller::{Action, Config as ControllerConfig, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};

use crate::controller::health_status::run_health_watcher;
use crate::controller::predicates::restarts_for_dogu;

type ControllerResult<K> = std::result::Result<
    (ObjectRef<K>, Action),
    kube::runtime::controller::Error<Error, kube::runtime::watcher::Error>,
>;

fn log_result<K: Resource>(kind: &str, result: ControllerResult<K>) {
    match result {
        Ok((obj, _action)) => tracing::debug!("Reconciled {}: {}", kind, obj.name),
        Err(e) => {
            // Watch events for objects deleted in the meantime end up here.
            let is_not_found = matches!(
                &e,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!("{} no longer exists: {:?}", kind, e);
            } else {
                tracing::error!("{} reconciliation error: {:?}", kind, e);
            }
        }
    }
}

/// Count the cached dogus per phase for the phase gauge
fn phase_counts(store: &Store<Dogu>) -> HashMap<String, i64> {
    let mut counts = HashMap::new();
    for dogu in store.state() {
        *counts.entry(dogu.phase().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Runtime settings shared by both controllers.
///
/// The runtime never runs two reconciliations of the same object at once;
/// `max_concurrent_reconciles` bounds the total across objects.
pub fn controller_config(config: &OperatorConfig) -> ControllerConfig {
    ControllerConfig::default().concurrency(config.max_concurrent_reconciles)
}

/// Run the Dogu controller in the given namespace.
///
/// Owned deployments, services and PVCs trigger the owning Dogu. The
/// controller runs at most one reconciliation per Dogu at a time and at most
/// `max_concurrent_reconciles` overall.
pub async fn run_dogu_controller(client: Client, config: &OperatorConfig, ctx: Arc<Context>) {
    let namespace = config.namespace.as_str();
    tracing::info!(namespace, "Starting controller for Dogu resources");

    let dogus: Api<Dogu> = Api::namespaced(client.clone(), namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let controller = Controller::new(dogus, watcher_config.clone())
        .with_config(controller_config(config))
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(pvcs, watcher_config);
    let store = controller.store();
    let health_state = ctx.health_state.clone();

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            if let Some(state) = &health_state {
                state.metrics.set_dogus_by_phase(&phase_counts(&store));
            }
            log_result("dogu", result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("Dogu controller stream ended unexpectedly");
}

/// Run the DoguRestart controller in the given namespace.
///
/// Changes of a Dogu wake every non-terminal restart targeting it, so a
/// target that finished stopping or starting drives the next restart phase.
pub async fn run_restart_controller(client: Client, config: &OperatorConfig, ctx: Arc<Context>) {
    let namespace = config.namespace.as_str();
    tracing::info!(namespace, "Starting controller for DoguRestart resources");

    let restarts: Api<DoguRestart> = Api::namespaced(client.clone(), namespace);
    let dogus: Api<Dogu> = Api::namespaced(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let controller = Controller::new(restarts, watcher_config.clone())
        .with_config(controller_config(config));
    let store = controller.store();

    controller
        .watches(dogus, watcher_config, move |dogu: Dogu| {
            restarts_for_dogu(&dogu, &store.state())
        })
        .run(reconcile_restart, restart_error_policy, ctx)
        .for_each(|result| {
            log_result("restart", result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("DoguRestart controller stream ended unexpectedly");
}

/// Run both controllers and the health watcher until one of them ends
pub async fn run_controllers(client: Client, config: OperatorConfig, ctx: Arc<Context>) {
    if let Some(state) = &ctx.health_state {
        state.set_ready(true).await;
    }
    let namespace = config.namespace.clone();

    tokio::select! {
        _ = run_dogu_controller(client.clone(), &config, ctx.clone()) => {}
        _ = run_restart_controller(client.clone(), &config, ctx.clone()) => {}
        _ = run_health_watcher(client, &namespace, ctx) => {}
    }
}
