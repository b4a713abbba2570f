//! Unit tests for the data volume expansion ladder

use dogu_operator::controller::async_step::INITIAL_CONDITION;
use dogu_operator::controller::events::reasons;
use dogu_operator::controller::volume::{
    EDIT_PVC_CONDITION, RESIZE_WAIT, SCALE_UP_CONDITION, STEP_REQUEUE, VolumeManager,
    WAIT_FOR_RESIZE_CONDITION,
};
use dogu_operator::crd::{DoguPhase, DoguStatus};
use dogu_operator::resources::pvc::{actual_capacity, requested_storage};

use crate::common::*;

/// Installed ldap asking for 4Gi while its volume has 2Gi
fn undersized() -> TestEnv {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap")
            .min_volume_size("4Gi")
            .installed(DEFAULT_VERSION)
            .build(),
        DEFAULT_VERSION,
    );
    env.infra.put_pvc(pvc("ldap", "2Gi", "2Gi"));
    env
}

async fn expand(env: &TestEnv) -> dogu_operator::Result<()> {
    VolumeManager::new(&env.ctx).expand(&env.dogu("ldap").unwrap()).await
}

fn status(env: &TestEnv) -> DoguStatus {
    env.dogu("ldap").unwrap().status.unwrap()
}

#[tokio::test]
async fn test_ladder_finishes_within_four_calls() {
    let env = undersized();

    let err = expand(&env).await.unwrap_err();
    assert_eq!(err.requeue_after(), Some(STEP_REQUEUE));
    assert_eq!(status(&env).status, DoguPhase::ResizingVolume);
    assert_eq!(status(&env).requeue_phase, EDIT_PVC_CONDITION);
    assert_eq!(status(&env).resize_replicas, Some(1));
    assert_eq!(env.infra.scales.lock().unwrap().last(), Some(&("ldap".to_string(), 0)));

    expand(&env).await.unwrap_err();
    assert_eq!(status(&env).requeue_phase, WAIT_FOR_RESIZE_CONDITION);
    assert_eq!(
        env.infra.resizes.lock().unwrap().as_slice(),
        &[("ldap".to_string(), "4Gi".to_string())]
    );
    env.infra.grant_pvc_request("ldap");

    expand(&env).await.unwrap_err();
    assert_eq!(status(&env).requeue_phase, SCALE_UP_CONDITION);

    expand(&env).await.unwrap();
    let status = status(&env);
    assert_eq!(status.status, DoguPhase::Installed);
    assert_eq!(status.requeue_phase, INITIAL_CONDITION);
    assert_eq!(status.resize_replicas, None);
    assert_eq!(env.infra.scales.lock().unwrap().last(), Some(&("ldap".to_string(), 1)));

    let pvc = env.infra.pvc("ldap").unwrap();
    assert_eq!(requested_storage(&pvc), Some("4Gi"));
    assert_eq!(actual_capacity(&pvc), Some("4Gi"));
}

#[tokio::test]
async fn test_waits_for_storage_system() {
    let env = undersized();
    expand(&env).await.unwrap_err();
    expand(&env).await.unwrap_err();

    for _ in 0..2 {
        let err = expand(&env).await.unwrap_err();
        assert_eq!(err.requeue_after(), Some(RESIZE_WAIT));
        assert_eq!(status(&env).requeue_phase, WAIT_FOR_RESIZE_CONDITION);
    }
    // the dogu stays scaled down while waiting
    assert_eq!(env.infra.deployment("ldap").unwrap().spec.unwrap().replicas, Some(0));
}

#[tokio::test]
async fn test_stopped_dogu_stays_stopped() {
    let env = TestEnv::new();
    env.install(
        DoguBuilder::new("ldap")
            .stopped()
            .min_volume_size("4Gi")
            .installed(DEFAULT_VERSION)
            .build(),
        DEFAULT_VERSION,
    );
    env.infra.put_pvc(pvc("ldap", "2Gi", "2Gi"));

    expand(&env).await.unwrap_err();
    assert_eq!(status(&env).resize_replicas, Some(0));
    expand(&env).await.unwrap_err();
    env.infra.grant_pvc_request("ldap");
    expand(&env).await.unwrap_err();
    expand(&env).await.unwrap();

    assert_eq!(env.infra.scales.lock().unwrap().last(), Some(&("ldap".to_string(), 0)));
}

#[tokio::test]
async fn test_unknown_condition_restarts_ladder() {
    let env = undersized();
    env.dogus.modify_dogu(NAMESPACE, "ldap", |d| {
        d.status.as_mut().unwrap().requeue_phase = "Reticulate splines".to_string();
    });

    let err = expand(&env).await.unwrap_err();
    assert!(err.requeue_after().is_some());
    assert_eq!(status(&env).requeue_phase, INITIAL_CONDITION);
    assert_eq!(env.infra.mutations(), 0);
}

#[tokio::test]
async fn test_expansion_event_published_once() {
    let env = undersized();
    expand(&env).await.unwrap_err();
    expand(&env).await.unwrap_err();
    env.infra.grant_pvc_request("ldap");
    expand(&env).await.unwrap_err();
    expand(&env).await.unwrap();

    let expansion_events = env
        .events
        .reasons()
        .into_iter()
        .filter(|r| r == reasons::VOLUME_EXPANSION)
        .count();
    // one when the ladder starts, one when it finishes
    assert_eq!(expansion_events, 2);
}
