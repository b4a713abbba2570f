//! Unit tests for DoguRestart reconciliation

use std::sync::Arc;
use std::sync::atomic::Ordering;

use kube::runtime::controller::Action;

use dogu_operator::controller::events::reasons;
use dogu_operator::controller::restart::RESTART_CHECK_INTERVAL;
use dogu_operator::crd::RestartPhase;
use dogu_operator::reconcile_restart;

use crate::common::*;

async fn step(env: &TestEnv) -> dogu_operator::Result<Action> {
    let restart = env.dogus.restart(NAMESPACE, "ldap-restart").unwrap();
    reconcile_restart(Arc::new(restart), env.ctx_arc()).await
}

fn phase(env: &TestEnv) -> RestartPhase {
    env.dogus.restart(NAMESPACE, "ldap-restart").unwrap().phase()
}

fn observe_stopped(env: &TestEnv, stopped: bool) {
    env.dogus.modify_dogu(NAMESPACE, "ldap", |d| {
        d.status.as_mut().unwrap().stopped = stopped;
    });
}

#[tokio::test]
async fn test_missing_target_ends_in_dogu_not_found() {
    let env = TestEnv::new();
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));

    let action = step(&env).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(phase(&env), RestartPhase::DoguNotFound);
    assert!(env.events.has(reasons::DOGU_NOT_FOUND));
}

#[tokio::test]
async fn test_full_restart_cycle() {
    let env = TestEnv::new();
    env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));

    // new -> stopping flips the desired state
    assert_eq!(step(&env).await.unwrap(), Action::requeue(RESTART_CHECK_INTERVAL));
    assert_eq!(phase(&env), RestartPhase::Stopping);
    assert!(env.dogu("ldap").unwrap().spec.stopped);

    // the dogu has not stopped yet
    assert_eq!(step(&env).await.unwrap(), Action::requeue(RESTART_CHECK_INTERVAL));
    assert_eq!(phase(&env), RestartPhase::Stopping);

    observe_stopped(&env, true);
    step(&env).await.unwrap();
    assert_eq!(phase(&env), RestartPhase::Stopped);

    step(&env).await.unwrap();
    assert_eq!(phase(&env), RestartPhase::Starting);
    assert!(!env.dogu("ldap").unwrap().spec.stopped);

    step(&env).await.unwrap();
    assert_eq!(phase(&env), RestartPhase::Starting);

    observe_stopped(&env, false);
    assert_eq!(step(&env).await.unwrap(), Action::await_change());
    assert_eq!(phase(&env), RestartPhase::Completed);

    // terminal phases are never left again
    let writes = env.dogus.restart_writes.load(Ordering::SeqCst);
    assert_eq!(step(&env).await.unwrap(), Action::await_change());
    assert_eq!(phase(&env), RestartPhase::Completed);
    assert_eq!(env.dogus.restart_writes.load(Ordering::SeqCst), writes);
}

#[tokio::test]
async fn test_phase_never_moves_backwards() {
    let env = TestEnv::new();
    env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));

    let mut last_rank = phase(&env).rank();
    for i in 0..12 {
        // the target follows its desired state every other call
        if i % 2 == 1 {
            let stopped = env.dogu("ldap").unwrap().spec.stopped;
            observe_stopped(&env, stopped);
        }
        step(&env).await.unwrap();
        let rank = phase(&env).rank();
        assert!(rank >= last_rank, "phase went back to {}", phase(&env));
        last_rank = rank;
    }
    assert_eq!(phase(&env), RestartPhase::Completed);
}

#[tokio::test]
async fn test_busy_target_waits() {
    let env = TestEnv::new();
    env.dogus.insert_dogu(DoguBuilder::new("ldap").build());
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));

    let action = step(&env).await.unwrap();

    assert_eq!(action, Action::requeue(RESTART_CHECK_INTERVAL));
    assert_eq!(phase(&env), RestartPhase::New);
    assert!(!env.dogu("ldap").unwrap().spec.stopped);
}

#[tokio::test]
async fn test_failed_lookup_is_reported_and_returned() {
    let env = TestEnv::new();
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));
    env.dogus.fail_gets("api server unavailable");

    assert!(step(&env).await.is_err());
    assert_eq!(phase(&env), RestartPhase::New);
    assert!(env.events.has(reasons::GET_DOGU_FAILED));
    assert_eq!(env.dogus.restart_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_lookup_while_starting_resumes_starting() {
    let env = TestEnv::new();
    env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::Starting));
    // the start was requested but the dogu has not come up yet
    observe_stopped(&env, true);

    env.dogus.fail_gets("api server unavailable");
    assert!(step(&env).await.is_err());
    assert_eq!(phase(&env), RestartPhase::Starting);

    env.dogus.recover_gets();
    assert_eq!(step(&env).await.unwrap(), Action::requeue(RESTART_CHECK_INTERVAL));
    assert_eq!(phase(&env), RestartPhase::Starting);
    assert!(!env.dogu("ldap").unwrap().spec.stopped, "dogu was stopped again");

    observe_stopped(&env, false);
    assert_eq!(step(&env).await.unwrap(), Action::await_change());
    assert_eq!(phase(&env), RestartPhase::Completed);
}

#[tokio::test]
async fn test_failed_stop_is_retried() {
    let env = TestEnv::new();
    env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
    env.dogus
        .insert_restart(restart("ldap-restart", "ldap", RestartPhase::New));
    env.dogus.inject_conflicts(5);

    assert!(step(&env).await.is_err());
    assert_eq!(phase(&env), RestartPhase::FailedStop);
    assert!(env.events.has(reasons::STOP_FAILED));

    step(&env).await.unwrap();
    assert_eq!(phase(&env), RestartPhase::Stopping);
    assert!(env.dogu("ldap").unwrap().spec.stopped);
}

#[tokio::test]
async fn test_deleted_restart_is_ignored() {
    let env = TestEnv::new();
    let gone = restart("ldap-restart", "ldap", RestartPhase::New);

    let action = reconcile_restart(Arc::new(gone), env.ctx_arc()).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(env.dogus.restart_writes.load(Ordering::SeqCst), 0);
}
