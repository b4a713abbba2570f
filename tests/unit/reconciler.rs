//! Unit tests for the reconcile entry point and dogu health mirroring

use std::sync::Arc;
use std::sync::atomic::Ordering;

use kube::runtime::controller::Action;

use dogu_operator::controller::ERROR_REQUEUE_INTERVAL;
use dogu_operator::controller::events::reasons;
use dogu_operator::controller::health_status::{DeploymentTracker, apply_health};
use dogu_operator::controller::predicates::ChangeEvent;
use dogu_operator::controller::status::{condition_status, condition_types, ready_reasons};
use dogu_operator::crd::{Condition, Dogu, DoguPhase, HealthStatus};
use dogu_operator::{FINALIZER, reconcile};

use crate::common::*;

fn ready_condition(dogu: &Dogu) -> Condition {
    dogu.status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == condition_types::READY))
        .cloned()
        .expect("ready condition")
}

async fn run(env: &TestEnv, name: &str) -> Action {
    let dogu = env.dogu(name).unwrap();
    reconcile(Arc::new(dogu), env.ctx_arc()).await.unwrap()
}

mod reconcile_dogu {
    use super::*;

    #[tokio::test]
    async fn test_new_dogu_is_installed() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").build());

        assert_eq!(run(&env, "ldap").await, Action::await_change());

        let dogu = env.dogu("ldap").unwrap();
        assert_eq!(dogu.phase(), DoguPhase::Installed);
        let ready = ready_condition(&dogu);
        assert_eq!(ready.status, condition_status::TRUE);
        assert_eq!(ready.reason, ready_reasons::RECONCILE_SUCCESS);
        assert_eq!(ready.observed_generation, Some(1));
        assert!(env.events.has(reasons::RECONCILE_SUCCEEDED));
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").build());
        run(&env, "ldap").await;
        let status_writes = env.dogus.status_writes.load(Ordering::SeqCst);
        let dogu_writes = env.dogus.dogu_writes.load(Ordering::SeqCst);
        let before = env.dogu("ldap").unwrap();

        assert_eq!(run(&env, "ldap").await, Action::await_change());

        assert_eq!(env.dogus.status_writes.load(Ordering::SeqCst), status_writes);
        assert_eq!(env.dogus.dogu_writes.load(Ordering::SeqCst), dogu_writes);
        assert_eq!(
            env.dogu("ldap").unwrap().metadata.resource_version,
            before.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_failure_requeues_and_reports() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("redmine").build());
        *env.dependencies.failure.lock().unwrap() = Some("postgresql is not installed".into());

        assert_eq!(run(&env, "redmine").await, Action::requeue(ERROR_REQUEUE_INTERVAL));

        let dogu = env.dogu("redmine").unwrap();
        assert!(dogu.has_finalizer(FINALIZER));
        assert_eq!(dogu.status.as_ref().unwrap().requeue_time, ERROR_REQUEUE_INTERVAL.as_secs());
        let ready = ready_condition(&dogu);
        assert_eq!(ready.status, condition_status::FALSE);
        assert_eq!(ready.reason, ready_reasons::HAS_TO_RECONCILE);
        assert!(ready.message.contains("postgresql is not installed"));

        let fail = env
            .events
            .all()
            .into_iter()
            .find(|e| e.reason == reasons::RECONCILE_FAIL)
            .unwrap();
        assert!(fail.warning);
    }

    #[tokio::test]
    async fn test_recovery_resets_requeue_time() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("redmine").build());
        *env.dependencies.failure.lock().unwrap() = Some("postgresql is not installed".into());
        run(&env, "redmine").await;

        *env.dependencies.failure.lock().unwrap() = None;
        assert_eq!(run(&env, "redmine").await, Action::await_change());

        let dogu = env.dogu("redmine").unwrap();
        assert_eq!(dogu.status.as_ref().unwrap().requeue_time, 0);
        assert_eq!(ready_condition(&dogu).status, condition_status::TRUE);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").version("latest").build());

        assert_eq!(run(&env, "ldap").await, Action::await_change());

        let ready = ready_condition(&env.dogu("ldap").unwrap());
        assert_eq!(ready.status, condition_status::FALSE);
        assert_eq!(ready.reason, ready_reasons::RECONCILE_FAIL);
    }

    #[tokio::test]
    async fn test_waiting_is_not_a_failure() {
        let env = TestEnv::new();
        env.install(
            DoguBuilder::new("ldap").installed(DEFAULT_VERSION).stopped().build(),
            DEFAULT_VERSION,
        );

        let action = run(&env, "ldap").await;

        assert_ne!(action, Action::await_change());
        assert!(env.events.has(reasons::REQUEUE));
        assert!(!env.events.has(reasons::RECONCILE_FAIL));
        assert_eq!(
            ready_condition(&env.dogu("ldap").unwrap()).reason,
            ready_reasons::HAS_TO_RECONCILE
        );
    }

    #[tokio::test]
    async fn test_deleted_dogu_is_released() {
        let env = TestEnv::new();
        env.install(
            DoguBuilder::new("ldap").installed(DEFAULT_VERSION).deleting().build(),
            DEFAULT_VERSION,
        );

        assert_eq!(run(&env, "ldap").await, Action::await_change());
        assert!(env.dogu("ldap").is_none());
    }

    #[tokio::test]
    async fn test_vanished_dogu_is_ignored() {
        let env = TestEnv::new();
        let gone = DoguBuilder::new("ldap").build();

        let action = reconcile(Arc::new(gone), env.ctx_arc()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(env.events.all().is_empty());
    }

    #[tokio::test]
    async fn test_stale_cached_object_is_refetched() {
        let env = TestEnv::new();
        env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
        let cached = env.dogu("ldap").unwrap();
        env.dogus.modify_dogu(NAMESPACE, "ldap", |d| d.spec.stopped = true);

        reconcile(Arc::new(cached), env.ctx_arc()).await.unwrap();

        // the stop was acted on although the cached object did not ask for it
        assert_eq!(env.dogu("ldap").unwrap().phase(), DoguPhase::Stopping);
    }
}

mod health {
    use super::*;

    fn installed(env: &TestEnv) {
        env.install(DoguBuilder::new("ldap").installed(DEFAULT_VERSION).build(), DEFAULT_VERSION);
    }

    fn health(env: &TestEnv) -> HealthStatus {
        env.dogu("ldap").unwrap().status.unwrap().health
    }

    #[tokio::test]
    async fn test_ready_deployment_makes_dogu_available() {
        let env = TestEnv::new();
        installed(&env);

        let event = ChangeEvent::Created(deployment("ldap", 1, true));
        assert!(apply_health(&env.ctx, &event).await.unwrap());
        assert_eq!(health(&env), HealthStatus::Available);

        // same health again is not written
        assert!(!apply_health(&env.ctx, &event).await.unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_readiness_is_filtered() {
        let env = TestEnv::new();
        installed(&env);
        let writes = env.dogus.status_writes.load(Ordering::SeqCst);

        let event = ChangeEvent::Updated {
            old: deployment("ldap", 1, false),
            new: deployment("ldap", 1, false),
        };
        assert!(!apply_health(&env.ctx, &event).await.unwrap());
        assert_eq!(env.dogus.status_writes.load(Ordering::SeqCst), writes);
    }

    #[tokio::test]
    async fn test_tracked_events_follow_readiness() {
        let env = TestEnv::new();
        installed(&env);
        let mut tracker = DeploymentTracker::new();

        apply_health(&env.ctx, &tracker.applied(deployment("ldap", 1, true)))
            .await
            .unwrap();
        assert_eq!(health(&env), HealthStatus::Available);

        apply_health(&env.ctx, &tracker.applied(deployment("ldap", 1, false)))
            .await
            .unwrap();
        assert_eq!(health(&env), HealthStatus::Unavailable);

        apply_health(&env.ctx, &tracker.applied(deployment("ldap", 1, true)))
            .await
            .unwrap();
        apply_health(&env.ctx, &tracker.deleted(deployment("ldap", 1, true)))
            .await
            .unwrap();
        assert_eq!(health(&env), HealthStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_deletion_missed_during_relist_marks_unavailable() {
        let env = TestEnv::new();
        installed(&env);
        let mut tracker = DeploymentTracker::new();
        apply_health(&env.ctx, &tracker.applied(deployment("ldap", 1, true)))
            .await
            .unwrap();
        assert_eq!(health(&env), HealthStatus::Available);

        // the relist no longer contains the deployment
        tracker.relist_started();
        let gone = tracker.relist_done();
        assert_eq!(gone.len(), 1);
        for change in &gone {
            apply_health(&env.ctx, change).await.unwrap();
        }
        assert_eq!(health(&env), HealthStatus::Unavailable);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_unlabelled_deployment_is_ignored() {
        let env = TestEnv::new();
        installed(&env);
        let mut foreign = deployment("ldap", 1, true);
        foreign.metadata.labels = None;

        assert!(!apply_health(&env.ctx, &ChangeEvent::Created(foreign)).await.unwrap());
        assert_eq!(health(&env), HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_deployment_without_dogu() {
        let env = TestEnv::new();
        let event = ChangeEvent::Created(deployment("cas", 1, true));
        assert!(!apply_health(&env.ctx, &event).await.unwrap());
    }
}
