//! Unit tests for operation routing

use std::sync::atomic::Ordering;

use dogu_operator::controller::DoguManager;
use dogu_operator::controller::manager::NEXT_OPERATION_REQUEUE;
use dogu_operator::crd::DoguPhase;
use dogu_operator::resources::service::service_ingress_annotations;

use crate::common::*;

#[tokio::test]
async fn test_converged_dogu_writes_nothing() {
    let env = TestEnv::new();
    env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);

    DoguManager::new(&env.ctx)
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap();

    assert_eq!(env.dogus.status_writes.load(Ordering::SeqCst), 0);
    assert_eq!(env.dogus.dogu_writes.load(Ordering::SeqCst), 0);
    assert_eq!(env.upserter.mutations(), 0);
    assert_eq!(env.infra.mutations(), 0);
}

#[tokio::test]
async fn test_observe_reports_cluster_state() {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap")
            .min_volume_size("8Gi")
            .installed(DEFAULT_VERSION)
            .build(),
        DEFAULT_VERSION,
    );
    env.infra.put_pvc(pvc("ldap", "2Gi", "2Gi"));

    let observed = DoguManager::new(&env.ctx)
        .observe(&env.dogu("ldap").unwrap())
        .await
        .unwrap();

    assert_eq!(observed.installed_version.as_deref(), Some(DEFAULT_VERSION));
    assert!(observed.volume_too_small);
    assert_eq!(observed.service_annotations, Some(Default::default()));
    assert!(!observed.support_mode_active);
}

#[tokio::test]
async fn test_runs_one_operation_per_call() {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap").installed(DEFAULT_VERSION).stopped().build(),
        DEFAULT_VERSION,
    );
    env.dogus.modify_dogu(NAMESPACE, "ldap", |d| {
        d.spec.additional_ingress_annotations.insert(
            "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
            "0".to_string(),
        );
    });
    let manager = DoguManager::new(&env.ctx);

    // annotations first, start/stop still pending
    let err = manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.requeue_after(), Some(NEXT_OPERATION_REQUEUE));
    let annotations = service_ingress_annotations(&env.infra.service("ldap").unwrap()).unwrap();
    assert_eq!(
        annotations.get("nginx.ingress.kubernetes.io/proxy-body-size").map(String::as_str),
        Some("0")
    );
    assert_eq!(env.infra.mutations(), 0);

    // then the stop, which waits for the deployment
    let err = manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("start/stop"));
    assert_eq!(env.dogu("ldap").unwrap().phase(), DoguPhase::Stopping);

    env.infra.converge_deployment("ldap");
    manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap();
    let dogu = env.dogu("ldap").unwrap();
    assert_eq!(dogu.phase(), DoguPhase::Installed);
    assert!(dogu.status.unwrap().stopped);
}

#[tokio::test]
async fn test_invalid_spec_is_terminal() {
    let env = TestEnv::new();
    env.dogus.insert_dogu(DoguBuilder::new("ldap").version("latest").build());

    let err = DoguManager::new(&env.ctx)
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap_err();

    assert!(err.is_terminal());
    assert_eq!(env.dogus.status_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_support_mode_freezes_other_changes() {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap").installed(DEFAULT_VERSION).support_mode().build(),
        DEFAULT_VERSION,
    );
    let manager = DoguManager::new(&env.ctx);

    manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap_err();
    env.infra.converge_deployment("ldap");
    manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap();

    env.dogus.modify_dogu(NAMESPACE, "ldap", |d| {
        d.spec.stopped = true;
        d.spec.version = "2.4.48-5".to_string();
    });
    manager
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap();

    assert_eq!(env.infra.mutations(), 0);
    let status = env.dogu("ldap").unwrap().status.unwrap();
    assert_eq!(status.installed_version.as_deref(), Some(DEFAULT_VERSION));
    assert!(!status.stopped);
}

#[tokio::test]
async fn test_leftover_phase_is_reset_when_converged() {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap")
            .installed(DEFAULT_VERSION)
            .phase(DoguPhase::Starting)
            .build(),
        DEFAULT_VERSION,
    );

    DoguManager::new(&env.ctx)
        .install_or_change(&env.dogu("ldap").unwrap())
        .await
        .unwrap();

    assert_eq!(env.dogu("ldap").unwrap().phase(), DoguPhase::Installed);
}
