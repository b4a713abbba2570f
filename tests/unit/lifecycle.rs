//! Unit tests for installing, upgrading and deleting dogus

use std::sync::atomic::Ordering;

use dogu_operator::FINALIZER;
use dogu_operator::controller::delete::DeleteManager;
use dogu_operator::controller::events::reasons;
use dogu_operator::controller::install::InstallManager;
use dogu_operator::controller::upgrade::UpgradeManager;
use dogu_operator::crd::DoguPhase;
use dogu_operator::registry::DevelopmentDescriptor;
use dogu_operator::resources::common::LABEL_DOGU_VERSION;
use kube::ResourceExt;

use crate::common::*;

mod install {
    use super::*;

    #[tokio::test]
    async fn test_install_creates_everything() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").build());

        InstallManager::new(&env.ctx)
            .install(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        let dogu = env.dogu("ldap").unwrap();
        let status = dogu.status.clone().unwrap();
        assert_eq!(status.status, DoguPhase::Installed);
        assert_eq!(status.installed_version.as_deref(), Some(DEFAULT_VERSION));
        assert!(dogu.has_finalizer(FINALIZER));

        assert_eq!(
            env.local_registry.current("ldap").map(|d| d.version),
            Some(DEFAULT_VERSION.to_string())
        );
        assert!(env.infra.deployment("ldap").is_some());
        assert!(env.infra.service("ldap").is_some());
        assert!(env.infra.pvc("ldap").is_some());
        assert_eq!(env.secrets.written.load(Ordering::SeqCst), 1);
        assert_eq!(env.service_accounts.created.load(Ordering::SeqCst), 1);
        assert_eq!(env.custom_resources.applied.load(Ordering::SeqCst), 1);
        assert!(env.events.has(reasons::INSTALLATION));
    }

    #[tokio::test]
    async fn test_stopped_dogu_installs_scaled_down() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").stopped().build());

        InstallManager::new(&env.ctx)
            .install(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        let deployment = env.infra.deployment("ldap").unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(0));
        assert!(env.dogu("ldap").unwrap().status.unwrap().stopped);
    }

    #[tokio::test]
    async fn test_dependency_failure_keeps_finalizer() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("redmine").build());
        *env.dependencies.failure.lock().unwrap() = Some("postgresql is not installed".into());

        let err = InstallManager::new(&env.ctx)
            .install(&env.dogu("redmine").unwrap())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("validate dependencies"));
        let dogu = env.dogu("redmine").unwrap();
        assert!(dogu.has_finalizer(FINALIZER));
        assert_eq!(dogu.phase(), DoguPhase::Installing);
        assert!(env.local_registry.current("redmine").is_none());
        assert!(env.infra.deployment("redmine").is_none());

        let warnings: Vec<_> = env.events.all().into_iter().filter(|e| e.warning).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, reasons::ERR_INSTALLATION);
    }

    #[tokio::test]
    async fn test_retry_after_failure_completes() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("redmine").build());
        *env.dependencies.failure.lock().unwrap() = Some("postgresql is not installed".into());
        let manager = InstallManager::new(&env.ctx);
        manager.install(&env.dogu("redmine").unwrap()).await.unwrap_err();

        *env.dependencies.failure.lock().unwrap() = None;
        manager.install(&env.dogu("redmine").unwrap()).await.unwrap();

        let dogu = env.dogu("redmine").unwrap();
        assert_eq!(dogu.phase(), DoguPhase::Installed);
        assert_eq!(dogu.finalizers().len(), 1);
    }

    #[tokio::test]
    async fn test_development_descriptor_is_consumed() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").build());
        *env.descriptors.development.lock().unwrap() = Some(DevelopmentDescriptor {
            namespace: NAMESPACE.to_string(),
            config_map: "ldap-descriptor".to_string(),
        });

        InstallManager::new(&env.ctx)
            .install(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        assert_eq!(env.descriptors.removed_development.load(Ordering::SeqCst), 1);
        assert!(env.descriptors.development.lock().unwrap().is_none());
    }
}

mod upgrade {
    use super::*;

    const OLD: &str = "2.4.48-3";

    fn env_with(dogu: dogu_operator::Dogu, installed: &str) -> TestEnv {
        let env = TestEnv::new();
        env.install(dogu, installed);
        env
    }

    #[tokio::test]
    async fn test_upgrade_to_newer_version() {
        let env = env_with(DoguBuilder::new("ldap").installed(OLD).build(), OLD);

        UpgradeManager::new(&env.ctx)
            .upgrade(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        let status = env.dogu("ldap").unwrap().status.unwrap();
        assert_eq!(status.status, DoguPhase::Installed);
        assert_eq!(status.installed_version.as_deref(), Some(DEFAULT_VERSION));
        assert_eq!(
            env.local_registry.current("ldap").map(|d| d.version),
            Some(DEFAULT_VERSION.to_string())
        );
        let deployment = env.infra.deployment("ldap").unwrap();
        assert_eq!(
            deployment.labels().get(LABEL_DOGU_VERSION).map(String::as_str),
            Some(DEFAULT_VERSION)
        );
        assert_eq!(
            env.events.reasons().iter().filter(|r| *r == reasons::UPGRADE).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_downgrade_needs_force() {
        let env = env_with(
            DoguBuilder::new("ldap").version(OLD).installed(DEFAULT_VERSION).build(),
            DEFAULT_VERSION,
        );

        let err = UpgradeManager::new(&env.ctx)
            .upgrade(&env.dogu("ldap").unwrap())
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        let status = env.dogu("ldap").unwrap().status.unwrap();
        assert_eq!(status.installed_version.as_deref(), Some(DEFAULT_VERSION));
        assert_eq!(status.status, DoguPhase::Installed);
        assert!(env.events.has(reasons::ERR_UPGRADE));
    }

    #[tokio::test]
    async fn test_forced_downgrade() {
        let env = env_with(
            DoguBuilder::new("ldap")
                .version(OLD)
                .force_upgrade()
                .installed(DEFAULT_VERSION)
                .build(),
            DEFAULT_VERSION,
        );

        UpgradeManager::new(&env.ctx)
            .upgrade(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        let status = env.dogu("ldap").unwrap().status.unwrap();
        assert_eq!(status.installed_version.as_deref(), Some(OLD));
    }

    #[tokio::test]
    async fn test_unhealthy_dogu_is_not_upgraded() {
        let env = env_with(DoguBuilder::new("ldap").installed(OLD).build(), OLD);
        env.infra.put_deployment(deployment("ldap", 1, false));

        let err = UpgradeManager::new(&env.ctx)
            .upgrade(&env.dogu("ldap").unwrap())
            .await
            .unwrap_err();

        assert!(err.requeue_after().is_some());
        assert_eq!(env.dogu("ldap").unwrap().phase(), DoguPhase::Installed);
        assert_eq!(env.local_registry.current("ldap").unwrap().version, OLD);
        assert_eq!(env.upserter.mutations(), 0);
        // waiting is not a failure
        assert!(!env.events.has(reasons::ERR_UPGRADE));
    }

    #[tokio::test]
    async fn test_missing_dependency_changes_nothing() {
        let env = env_with(DoguBuilder::new("ldap").installed(OLD).build(), OLD);
        *env.dependencies.failure.lock().unwrap() = Some("cas 7.0 required".into());

        UpgradeManager::new(&env.ctx)
            .upgrade(&env.dogu("ldap").unwrap())
            .await
            .unwrap_err();

        assert_eq!(env.local_registry.current("ldap").unwrap().version, OLD);
        assert_eq!(env.local_registry.registrations.load(Ordering::SeqCst), 0);
        assert_eq!(env.dogu("ldap").unwrap().phase(), DoguPhase::Installed);
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn test_delete_cleans_up_and_releases() {
        let env = TestEnv::new();
        env.install(
            DoguBuilder::new("ldap").installed(DEFAULT_VERSION).deleting().build(),
            DEFAULT_VERSION,
        );

        DeleteManager::new(&env.ctx)
            .delete(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        assert!(env.dogu("ldap").is_none());
        assert!(env.local_registry.current("ldap").is_none());
        assert_eq!(env.service_accounts.removed.load(Ordering::SeqCst), 1);
        assert_eq!(env.config_store.deleted.load(Ordering::SeqCst), 1);
        assert!(env.events.has(reasons::DELETION));
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_block_deletion() {
        let env = TestEnv::new();
        env.install(
            DoguBuilder::new("ldap").installed(DEFAULT_VERSION).deleting().build(),
            DEFAULT_VERSION,
        );
        *env.local_registry.fail_unregister.lock().unwrap() = true;
        *env.service_accounts.fail_remove.lock().unwrap() = true;

        DeleteManager::new(&env.ctx)
            .delete(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        assert!(env.dogu("ldap").is_none());
        let warnings = env
            .events
            .all()
            .into_iter()
            .filter(|e| e.warning && e.reason == reasons::ERR_DELETION)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn test_without_finalizer_nothing_happens() {
        let env = TestEnv::new();
        env.dogus.insert_dogu(DoguBuilder::new("ldap").deleting().build());

        DeleteManager::new(&env.ctx)
            .delete(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        assert_eq!(env.dogus.dogu_writes.load(Ordering::SeqCst), 0);
        assert_eq!(env.dogus.status_writes.load(Ordering::SeqCst), 0);
        assert_eq!(env.config_store.deleted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_finalizers_keep_the_dogu() {
        let env = TestEnv::new();
        let mut dogu = DoguBuilder::new("ldap").installed(DEFAULT_VERSION).deleting().build();
        dogu.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push("example.com/backup".to_string());
        env.install(dogu, DEFAULT_VERSION);

        DeleteManager::new(&env.ctx)
            .delete(&env.dogu("ldap").unwrap())
            .await
            .unwrap();

        let dogu = env.dogu("ldap").unwrap();
        assert!(!dogu.has_finalizer(FINALIZER));
        assert_eq!(dogu.finalizers(), &["example.com/backup".to_string()]);
        assert_eq!(dogu.phase(), DoguPhase::Deleting);
    }
}
