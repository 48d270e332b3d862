//! Integration tests for CoordinatorService.
//!
//! Every call goes through a group's event queue, so these exercise the same
//! ordering members see in production: a request issued after another is
//! answered after it.

use crate::test_utilities::*;
use keel::{BrokerId, Epoch, GroupId, InMemoryPartitionCatalog, KeelError, StrategyKind, TopicSpec};
use keel_coordinator::{
    ClusterManifest, CoordinatorConfig, CoordinatorError, CoordinatorService, GroupSpec,
    HeartbeatRequest, HeartbeatResponse, JoinRequest, LeaveRequest, RebalanceService,
    member::DEFAULT_INBOX_CAPACITY, member_channel,
};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

fn create_test_service(catalog: &InMemoryPartitionCatalog) -> CoordinatorService {
    let service = CoordinatorService::new(create_test_config(), Arc::new(catalog.clone())).unwrap();
    service
        .register_group(test_group(), TEST_TOPIC, None)
        .unwrap();
    service
}

/// Join through an auto-acknowledging channel member.
async fn join_channel_member(
    service: &CoordinatorService,
    group: &GroupId,
    id: &str,
) -> keel_coordinator::JoinResponse {
    let (handle, inbox) = member_channel(DEFAULT_INBOX_CAPACITY);
    inbox.auto_acknowledge(member(id));
    service
        .join(JoinRequest::new(group.clone(), member(id)), Arc::new(handle))
        .await
        .unwrap()
}

#[test(tokio::test)]
async fn test_member_lifecycle() {
    let catalog = create_test_catalog(4);
    let service = create_test_service(&catalog);

    let first = join_channel_member(&service, &test_group(), "member-000").await;
    assert_eq!(first.epoch, Epoch(1));
    assert_eq!(partition_ids(&first.assigned_partitions), vec![0, 1, 2, 3]);

    let second = join_channel_member(&service, &test_group(), "member-001").await;
    assert_eq!(second.epoch, Epoch(2));
    assert_eq!(partition_ids(&second.assigned_partitions), vec![2, 3]);

    let heartbeat = service
        .heartbeat(HeartbeatRequest {
            group_id: test_group(),
            member_id: member("member-000"),
            epoch: first.epoch,
        })
        .await
        .unwrap();
    assert_eq!(heartbeat, HeartbeatResponse::RejoinRequired { epoch: Epoch(2) });

    let view = service
        .fetch_assignment(&test_group(), &member("member-000"))
        .await
        .unwrap();
    assert_eq!(view.epoch, Epoch(2));
    assert_eq!(partition_ids(&view.partitions), vec![0, 1]);

    let left = service
        .leave(LeaveRequest {
            group_id: test_group(),
            member_id: member("member-001"),
        })
        .await
        .unwrap();
    assert!(left.ok);

    let description = service.describe_group(&test_group()).await.unwrap();
    assert_eq!(description.epoch, Epoch(3));
    assert_eq!(description.members, vec![member("member-000")]);
    assert_eq!(
        description
            .assignment
            .partitions_of(&member("member-000"))
            .map(|owned| partition_ids(owned)),
        Some(vec![0, 1, 2, 3])
    );

    service.shutdown().await;
}

#[test(tokio::test)]
async fn test_anonymous_join_gets_minted_id() {
    let log = new_command_log();
    let catalog = create_test_catalog(2);
    let service = create_test_service(&catalog);

    let response = service
        .join(
            JoinRequest::anonymous(test_group()),
            RecordingMember::new("anonymous", &log),
        )
        .await
        .unwrap();

    assert!(response.member_id.as_str().starts_with("member-"));
    assert!(response.member_id.is_valid());
    assert_eq!(response.assigned_partitions.len(), 2);
    assert_eq!(drain(&log).len(), 1);

    let description = service.describe_group(&test_group()).await.unwrap();
    assert_eq!(description.members, vec![response.member_id]);
}

#[test(tokio::test)]
async fn test_unknown_group() {
    let catalog = create_test_catalog(4);
    let service = create_test_service(&catalog);
    let missing = GroupId::new_unchecked("missing");

    let error = service.describe_group(&missing).await.unwrap_err();
    assert_eq!(
        error,
        CoordinatorError::GroupNotFound {
            group_id: "missing".to_string()
        }
    );
    assert!(service.reconcile(&missing).await.unwrap_err().is_not_found());
}

#[test(tokio::test)]
async fn test_register_group_validation() {
    let catalog = create_test_catalog(4);
    let service = create_test_service(&catalog);

    let duplicate = service.register_group(test_group(), TEST_TOPIC, None);
    assert!(matches!(
        duplicate,
        Err(CoordinatorError::GroupAlreadyExists { .. })
    ));

    let unknown_topic =
        service.register_group(GroupId::new_unchecked("other"), "no-such-topic", None);
    assert!(matches!(
        unknown_topic,
        Err(CoordinatorError::Membership(KeelError::TopicNotFound { .. }))
    ));

    service
        .register_group(
            GroupId::new_unchecked("hashed"),
            TEST_TOPIC,
            Some(StrategyKind::ConsistentHash),
        )
        .unwrap();
    assert_eq!(
        service.group_ids(),
        vec![GroupId::new_unchecked("hashed"), test_group()]
    );
    let description = service
        .describe_group(&GroupId::new_unchecked("hashed"))
        .await
        .unwrap();
    assert_eq!(description.strategy, "consistent_hash");
}

#[test(tokio::test)]
async fn test_notify_partitions_changed_reaches_consuming_groups() {
    let catalog = InMemoryPartitionCatalog::with_topics([
        TopicSpec {
            name: TEST_TOPIC.to_string(),
            brokers: vec![BrokerId(1)],
            partition_count: 4,
        },
        TopicSpec {
            name: "audit".to_string(),
            brokers: vec![BrokerId(1)],
            partition_count: 1,
        },
    ])
    .unwrap();
    let service = create_test_service(&catalog);
    service
        .register_group(GroupId::new_unchecked("mirror"), TEST_TOPIC, None)
        .unwrap();
    service
        .register_group(GroupId::new_unchecked("auditor"), "audit", None)
        .unwrap();
    join_channel_member(&service, &test_group(), "member-000").await;

    catalog.add_partitions(TEST_TOPIC, 2).unwrap();
    assert_eq!(service.notify_partitions_changed(TEST_TOPIC).await, 2);
    assert_eq!(service.notify_partitions_changed("unused").await, 0);

    let description = service.describe_group(&test_group()).await.unwrap();
    assert_eq!(description.epoch, Epoch(2));
    assert_eq!(description.assignment.assigned_count(), 6);
}

#[test(tokio::test)]
async fn test_reconcile_without_changes_keeps_epoch() {
    let catalog = create_test_catalog(4);
    let service = create_test_service(&catalog);
    join_channel_member(&service, &test_group(), "member-000").await;

    service.reconcile(&test_group()).await.unwrap();
    service.reconcile(&test_group()).await.unwrap();

    let description = service.describe_group(&test_group()).await.unwrap();
    assert_eq!(description.epoch, Epoch(1));
}

#[test(tokio::test)]
async fn test_background_expiry_removes_silent_members() {
    let config = CoordinatorConfig {
        heartbeat_interval_ms: 20,
        session_timeout_ms: 150,
        ..create_test_config()
    };
    let catalog = create_test_catalog(4);
    let service = Arc::new(CoordinatorService::new(config, Arc::new(catalog.clone())).unwrap());
    service
        .register_group(test_group(), TEST_TOPIC, None)
        .unwrap();
    service.start_background_tasks();

    join_channel_member(&service, &test_group(), "member-000").await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let description = service.describe_group(&test_group()).await.unwrap();
    assert!(description.members.is_empty());
    assert!(description.assignment.is_empty());
    assert_eq!(description.epoch, Epoch(2));

    service.shutdown().await;
}

#[test(tokio::test)]
async fn test_shutdown_stops_every_group() {
    let catalog = create_test_catalog(4);
    let service = create_test_service(&catalog);
    join_channel_member(&service, &test_group(), "member-000").await;

    service.shutdown().await;

    assert!(service.group_ids().is_empty());
    let error = service.describe_group(&test_group()).await.unwrap_err();
    assert!(error.is_not_found());
}

#[test(tokio::test)]
async fn test_from_manifest_registers_groups() {
    let manifest = ClusterManifest {
        coordinator: create_test_config(),
        topics: vec![TopicSpec {
            name: TEST_TOPIC.to_string(),
            brokers: vec![BrokerId(1), BrokerId(2)],
            partition_count: 3,
        }],
        groups: vec![
            GroupSpec {
                group_id: "billing".to_string(),
                topic: TEST_TOPIC.to_string(),
                strategy: Some(StrategyKind::Circular),
            },
            GroupSpec {
                group_id: "analytics".to_string(),
                topic: TEST_TOPIC.to_string(),
                strategy: None,
            },
        ],
    };

    let service = CoordinatorService::from_manifest(&manifest).unwrap();
    assert_eq!(
        service.group_ids(),
        vec![
            GroupId::new_unchecked("analytics"),
            GroupId::new_unchecked("billing")
        ]
    );

    let billing = GroupId::new_unchecked("billing");
    join_channel_member(&service, &billing, "a").await;
    join_channel_member(&service, &billing, "b").await;
    let description = service.describe_group(&billing).await.unwrap();
    assert_eq!(description.strategy, "circular");
    assert_eq!(
        description
            .assignment
            .partitions_of(&member("a"))
            .map(|owned| partition_ids(owned)),
        Some(vec![0, 2])
    );

    service.shutdown().await;
}
