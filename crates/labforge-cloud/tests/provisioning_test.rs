mod common;

use common::{TestLab, credential};
use labforge_cloud::{
    ActionType, CheckpointStore, CloudError, Direction, LiveResource, MemoryProvider,
    MockConnector, ResourceKind, SecurityRule, Stage,
};
use std::time::Duration;

const RESOURCE_KINDS: [ResourceKind; 7] = ResourceKind::ALL;

#[tokio::test]
async fn test_full_run_from_empty_checkpoint() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;

    let report = engine.run_all(&credential()).await.unwrap();

    for kind in RESOURCE_KINDS {
        assert_eq!(lab.provider.create_calls(kind), 1, "{} created once", kind);
    }

    let summary = report.summary();
    assert_eq!(summary.create, 6);
    assert_eq!(summary.adopt, 2);
    assert_eq!(summary.converge, 2);

    let stored = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();
    assert_eq!(stored.state().populated(), 12);
    assert!(stored.state().finalized_at.is_some());
    assert_eq!(stored.state().region.as_deref(), Some("ap-guangzhou"));
    assert_eq!(stored.state().zone.as_deref(), Some("ap-guangzhou-3"));

    let log = lab.connector.log();
    assert_eq!(log.commands[0], "mkdir -p /root/labforge");
    assert!(log.commands.contains(&"systemctl enable --now nfs-server".to_string()));
    assert_eq!(log.closed, 1);
}

#[tokio::test]
async fn test_created_resources_carry_deployment_tag() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;
    engine.run_all(&credential()).await.unwrap();

    for kind in RESOURCE_KINDS {
        let resources = lab.provider.resources(kind);
        assert_eq!(resources.len(), 1);
        assert!(resources[0].belongs_to("test-lab"));
        assert!(resources[0].name.starts_with("labforge-"));
    }
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let lab = TestLab::new();
    let first = lab.engine().await.run_all(&credential()).await.unwrap();
    let first_state = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();

    let second = lab.engine().await.run_all(&credential()).await.unwrap();
    let second_state = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();

    assert_eq!(lab.provider.total_create_calls(), 7);
    assert_eq!(second.summary().create, 0);
    assert_eq!(second.summary().adopt, 0);
    for stage in [Stage::Project, Stage::Network, Stage::ObjectStore, Stage::ClusterNode] {
        assert_eq!(
            first.outcome(stage).unwrap().resource_id,
            second.outcome(stage).unwrap().resource_id
        );
        assert_eq!(second.outcome(stage).unwrap().action, ActionType::NoOp);
    }
    assert_eq!(first_state.state().instance_id, second_state.state().instance_id);
    assert_eq!(
        first_state.state().instance_password,
        second_state.state().instance_password
    );
}

#[tokio::test]
async fn test_finalize_leaves_only_production_rules() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;

    engine
        .run_range(&credential(), Stage::Region, Stage::SecurityPolicies)
        .await
        .unwrap();
    let group_id = engine.checkpoint().state().security_group_id.clone().unwrap();
    let bootstrap = lab.provider.rules(&group_id, Direction::Ingress);
    assert_eq!(bootstrap.len(), 3);
    assert!(bootstrap.contains(&SecurityRule::allow("TCP", "22", "0.0.0.0/0")));

    engine
        .run_range(&credential(), Stage::ObjectStore, Stage::NodeNetworkFinalize)
        .await
        .unwrap();

    let mut production = lab.provider.rules(&group_id, Direction::Ingress);
    production.sort_by(|a, b| a.port.cmp(&b.port));
    assert_eq!(
        production,
        vec![
            SecurityRule::allow("TCP", "443", "0.0.0.0/0"),
            SecurityRule::allow("ALL", "ALL", "10.0.0.0/16"),
        ]
    );
}

#[tokio::test]
async fn test_failed_save_is_recovered_by_tag_adoption() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;
    engine
        .run_range(&credential(), Stage::Region, Stage::Project)
        .await
        .unwrap();

    // A directory squatting on the temp path makes the next save fail.
    let tmp = lab.checkpoint_path().with_file_name("checkpoint.json.tmp");
    std::fs::create_dir(&tmp).unwrap();

    let err = engine.run(&credential(), Stage::Network).await.unwrap_err();
    assert!(matches!(err, CloudError::CheckpointSave(_)));
    assert_eq!(lab.provider.create_calls(ResourceKind::Vpc), 1);

    let stored = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();
    assert!(stored.state().vpc_id.is_none());

    std::fs::remove_dir(&tmp).unwrap();
    let mut engine = lab.engine().await;
    engine.run(&credential(), Stage::Network).await.unwrap();

    assert_eq!(lab.provider.create_calls(ResourceKind::Vpc), 1);
    assert_eq!(lab.provider.create_calls(ResourceKind::Subnet), 1);
    let vpc = &lab.provider.resources(ResourceKind::Vpc)[0];
    assert_eq!(engine.checkpoint().state().vpc_id.as_deref(), Some(vpc.id.as_str()));
}

#[tokio::test]
async fn test_recorded_resource_that_vanished_is_recreated() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;
    engine
        .run_range(&credential(), Stage::Region, Stage::Project)
        .await
        .unwrap();
    let old = engine.checkpoint().state().project_id.clone().unwrap();

    lab.provider.remove(ResourceKind::Project, &old);
    let outcome = engine.run(&credential(), Stage::Project).await.unwrap();

    assert_eq!(outcome.action, ActionType::Create);
    assert_ne!(outcome.resource_id, old);
    assert_eq!(lab.provider.create_calls(ResourceKind::Project), 2);
}

#[tokio::test]
async fn test_foreign_resources_are_not_adopted() {
    let provider = MemoryProvider::new();
    provider.insert(
        ResourceKind::Project,
        LiveResource::new("proj-foreign", "labforge-proj-aaaaaa")
            .with_tag(labforge_cloud::DEPLOYMENT_TAG, "other-lab"),
    );
    let lab = TestLab::with_provider(provider);
    let mut engine = lab.engine().await;

    engine
        .run_range(&credential(), Stage::Region, Stage::Project)
        .await
        .unwrap();

    let recorded = engine.checkpoint().state().project_id.clone().unwrap();
    assert_ne!(recorded, "proj-foreign");
    assert_eq!(lab.provider.create_calls(ResourceKind::Project), 1);
}

#[tokio::test]
async fn test_quota_exhaustion_stops_before_create() {
    let provider = MemoryProvider::new().with_quota(ResourceKind::Cluster, 1);
    provider.insert(ResourceKind::Cluster, LiveResource::new("cls-other", "someone-else"));
    let lab = TestLab::with_provider(provider);
    let mut engine = lab.engine().await;

    let err = engine
        .run_range(&credential(), Stage::Region, Stage::ManagedCluster)
        .await
        .unwrap_err();

    match err {
        CloudError::QuotaExceeded { kind, used, limit } => {
            assert_eq!(kind, ResourceKind::Cluster);
            assert_eq!(used, 1);
            assert_eq!(limit, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(lab.provider.create_calls(ResourceKind::Cluster), 0);
    assert!(engine.checkpoint().state().cluster_id.is_none());
    assert!(engine.checkpoint().state().bucket_name.is_some());
}

#[tokio::test]
async fn test_provider_rejection_writes_nothing() {
    let lab = TestLab::new();
    lab.provider.fail_creates(ResourceKind::Bucket);
    let mut engine = lab.engine().await;

    let err = engine.run_all(&credential()).await.unwrap_err();
    assert!(matches!(
        err,
        CloudError::ProviderSubmit {
            kind: ResourceKind::Bucket,
            ..
        }
    ));
    assert!(err.to_string().contains("simulated failure"));

    let stored = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();
    assert!(stored.state().bucket_name.is_none());
    assert!(stored.state().security_group_id.is_some());

    lab.provider.allow_creates(ResourceKind::Bucket);
    lab.engine().await.run_all(&credential()).await.unwrap();
    assert_eq!(lab.provider.create_calls(ResourceKind::Bucket), 2);
    assert_eq!(lab.provider.resources(ResourceKind::Bucket).len(), 1);
}

#[tokio::test]
async fn test_stage_without_upstream_fails() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;

    let err = engine.run(&credential(), Stage::Network).await.unwrap_err();
    assert!(matches!(err, CloudError::MissingPrerequisite("region")));
    assert_eq!(lab.provider.total_create_calls(), 0);
}

#[tokio::test]
async fn test_account_mismatch_is_rejected() {
    let lab = TestLab::new();
    let mut store = CheckpointStore::empty(lab.checkpoint_path());
    store.state_mut().set("owner_account", "200000000002");
    store.save().await.unwrap();

    let mut engine = lab.engine().await;
    let err = engine.run(&credential(), Stage::Account).await.unwrap_err();
    assert!(matches!(err, CloudError::ProviderQuery(_)));
}

#[tokio::test]
async fn test_preferred_region_and_zone() {
    let provider = MemoryProvider::new().with_regions(vec![
        labforge_cloud::RegionInfo::new("ap-guangzhou", &["ap-guangzhou-3"]),
        labforge_cloud::RegionInfo::new("ap-shanghai", &["ap-shanghai-2", "ap-shanghai-5"]),
    ]);
    let mut lab = TestLab::with_provider(provider);
    lab.settings.region = Some("ap-shanghai".to_string());
    lab.settings.zone = Some("ap-shanghai-5".to_string());

    let mut engine = lab.engine().await;
    let outcome = engine.run(&credential(), Stage::Region).await.unwrap();
    assert_eq!(outcome.resource_id, "ap-shanghai/ap-shanghai-5");
    assert_eq!(outcome.action, ActionType::Adopt);

    let again = engine.run(&credential(), Stage::Region).await.unwrap();
    assert_eq!(again.action, ActionType::NoOp);
}

#[tokio::test]
async fn test_recorded_region_is_never_reselected() {
    let first = TestLab::with_provider(MemoryProvider::new().with_regions(vec![
        labforge_cloud::RegionInfo::new("ap-a", &["ap-a-1"]),
        labforge_cloud::RegionInfo::new("ap-b", &["ap-b-1"]),
    ]));
    first
        .engine()
        .await
        .run_range(&credential(), Stage::Region, Stage::Project)
        .await
        .unwrap();

    // same checkpoint, provider that no longer offers ap-a
    let mut moved = TestLab::with_provider(
        MemoryProvider::new()
            .with_regions(vec![labforge_cloud::RegionInfo::new("ap-b", &["ap-b-1"])]),
    );
    moved.settings.region = Some("ap-b".to_string());
    std::fs::create_dir_all(moved.checkpoint_path().parent().unwrap()).unwrap();
    std::fs::copy(first.checkpoint_path(), moved.checkpoint_path()).unwrap();
    let before = std::fs::read_to_string(moved.checkpoint_path()).unwrap();

    let err = moved
        .engine()
        .await
        .run(&credential(), Stage::Region)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::ProviderQuery(_)));
    assert!(err.to_string().contains("ap-a"));

    let stored = CheckpointStore::load(moved.checkpoint_path()).await.unwrap();
    assert_eq!(stored.state().region.as_deref(), Some("ap-a"));
    assert_eq!(stored.state().zone.as_deref(), Some("ap-a-1"));
    assert_eq!(std::fs::read_to_string(moved.checkpoint_path()).unwrap(), before);
}

#[tokio::test]
async fn test_recorded_zone_that_vanished_is_an_error() {
    let lab = TestLab::new();
    let mut store = CheckpointStore::empty(lab.checkpoint_path());
    store.state_mut().set("region", "ap-guangzhou");
    store.state_mut().set("zone", "ap-guangzhou-9");
    store.save().await.unwrap();

    let mut engine = lab.engine().await;
    let err = engine.run(&credential(), Stage::Region).await.unwrap_err();

    assert!(matches!(err, CloudError::ProviderQuery(_)));
    assert_eq!(engine.checkpoint().state().zone.as_deref(), Some("ap-guangzhou-9"));
}

#[tokio::test]
async fn test_rule_write_failure_is_retried_during_finalize() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;
    engine
        .run_range(&credential(), Stage::Region, Stage::ClusterNode)
        .await
        .unwrap();

    lab.provider.fail_rule_writes(1);
    engine
        .run(&credential(), Stage::NodeNetworkFinalize)
        .await
        .unwrap();

    assert!(engine.checkpoint().state().finalized_at.is_some());
    let group_id = engine.checkpoint().state().security_group_id.clone().unwrap();
    let rules = lab.provider.rules(&group_id, Direction::Ingress);
    assert_eq!(rules.len(), 2);
    assert!(!rules.contains(&SecurityRule::allow("TCP", "22", "0.0.0.0/0")));
}

#[tokio::test]
async fn test_persistent_rule_write_failure_leaves_node_unfinalized() {
    let lab = TestLab::new();
    let mut engine = lab.engine().await;
    engine
        .run_range(&credential(), Stage::Region, Stage::ClusterNode)
        .await
        .unwrap();
    let group_id = engine.checkpoint().state().security_group_id.clone().unwrap();

    lab.provider.fail_rule_writes(100);
    let err = engine
        .run(&credential(), Stage::NodeNetworkFinalize)
        .await
        .unwrap_err();

    match &err {
        CloudError::SecurityConvergence(message) => {
            assert!(message.contains("rule change"), "{}", message);
            assert!(message.contains(&group_id), "{}", message);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(engine.checkpoint().state().finalized_at.is_none());
    let stored = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();
    assert!(stored.state().finalized_at.is_none());
    // the bootstrap rules, including SSH, are still in place
    assert!(
        lab.provider
            .rules(&group_id, Direction::Ingress)
            .contains(&SecurityRule::allow("TCP", "22", "0.0.0.0/0"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_node_waits_for_public_address() {
    let lab = TestLab::with_provider(MemoryProvider::new().with_address_delay(2));
    let mut engine = lab.engine().await;

    let start = tokio::time::Instant::now();
    engine
        .run_range(&credential(), Stage::Region, Stage::ClusterNode)
        .await
        .unwrap();

    assert!(engine.checkpoint().state().instance_ip.is_some());
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_failed_address_wait_keeps_instance_and_password() {
    let mut lab = TestLab::with_provider(MemoryProvider::new().with_address_delay(3));
    lab.settings.node.ready_attempts = 2;

    let err = lab
        .engine()
        .await
        .run_range(&credential(), Stage::Region, Stage::ClusterNode)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::ProviderQuery(_)));

    let stored = CheckpointStore::load(lab.checkpoint_path()).await.unwrap();
    let instance_id = stored.state().instance_id.clone().unwrap();
    let password = stored.state().instance_password.clone().unwrap();
    assert!(stored.state().instance_ip.is_none());

    let mut engine = lab.engine().await;
    let outcome = engine.run(&credential(), Stage::ClusterNode).await.unwrap();

    assert_eq!(outcome.resource_id, instance_id);
    assert_eq!(lab.provider.create_calls(ResourceKind::Instance), 1);
    let state = engine.checkpoint().state();
    assert_eq!(state.instance_password.as_deref(), Some(password.as_str()));
    assert!(state.instance_ip.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_finalize_connects_on_third_attempt() {
    let lab = TestLab::new().with_connector(MockConnector::new().fail_first_connects(2));
    let mut engine = lab.engine().await;

    engine.run_all(&credential()).await.unwrap();

    assert_eq!(lab.connector.connect_attempts(), 3);
    assert!(engine.checkpoint().state().finalized_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_finalize_gives_up_after_three_connects() {
    let lab = TestLab::new().with_connector(MockConnector::new().fail_first_connects(3));
    let mut engine = lab.engine().await;

    let err = engine.run_all(&credential()).await.unwrap_err();

    assert!(matches!(err, CloudError::Connection(_)));
    assert_eq!(lab.connector.connect_attempts(), 3);
    assert!(engine.checkpoint().state().finalized_at.is_none());
    assert!(lab.connector.log().commands.is_empty());
}

#[tokio::test]
async fn test_bootstrap_step_is_retried() {
    let lab = TestLab::new()
        .with_connector(MockConnector::new().fail_command("systemctl enable --now nfs-server", 2));
    let mut engine = lab.engine().await;

    engine.run_all(&credential()).await.unwrap();

    let runs = lab
        .connector
        .log()
        .commands
        .iter()
        .filter(|c| c.as_str() == "systemctl enable --now nfs-server")
        .count();
    assert_eq!(runs, 3);
}

#[tokio::test]
async fn test_bootstrap_failure_keeps_bootstrap_rules() {
    let lab = TestLab::new()
        .with_connector(MockConnector::new().fail_command("systemctl enable --now nfs-server", 3));
    let mut engine = lab.engine().await;

    let err = engine.run_all(&credential()).await.unwrap_err();
    match &err {
        CloudError::RemoteBootstrap { command, output } => {
            assert_eq!(command, "systemctl enable --now nfs-server");
            assert!(output.contains("exit status 1"));
        }
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(lab.connector.log().closed, 1);
    assert!(engine.checkpoint().state().finalized_at.is_none());
    let group_id = engine.checkpoint().state().security_group_id.clone().unwrap();
    assert!(
        lab.provider
            .rules(&group_id, Direction::Ingress)
            .contains(&SecurityRule::allow("TCP", "22", "0.0.0.0/0"))
    );
}

#[tokio::test]
async fn test_deployment_files_are_pushed() {
    let mut lab = TestLab::new();
    let file = lab.root.path().join("deploy.sh");
    std::fs::write(&file, "#!/bin/sh\necho deploy\n").unwrap();
    lab.settings.remote.files = vec![file.clone()];

    let mut engine = lab.engine().await;
    let report = engine.run_all(&credential()).await.unwrap();

    let log = lab.connector.log();
    assert_eq!(log.pushes, vec![(file, "/root/labforge/deploy.sh".to_string())]);
    assert!(
        report
            .outcome(Stage::NodeNetworkFinalize)
            .unwrap()
            .description
            .contains("pushed 1 file(s)")
    );
}

#[tokio::test]
async fn test_missing_deployment_file_fails_finalize() {
    let mut lab = TestLab::new();
    lab.settings.remote.files = vec![lab.root.path().join("absent.tar.gz")];

    let mut engine = lab.engine().await;
    let err = engine.run_all(&credential()).await.unwrap_err();

    assert!(matches!(err, CloudError::RemoteBootstrap { .. }));
    assert_eq!(lab.connector.log().closed, 1);
}
