use crate::test_utilities::*;
use keel::{BrokerId, Epoch, StrategyKind};
use keel_coordinator::{CoordinatorConfig, CoordinatorError, GroupHealth};
use test_log::test;

fn no_retry_config() -> CoordinatorConfig {
    CoordinatorConfig {
        max_rebalance_retries: 0,
        ..create_test_config()
    }
}

#[test(tokio::test)]
async fn test_revoke_timeout_excludes_member() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let (mut coordinator, roster) =
        create_test_coordinator_with_roster(create_test_config(), &catalog, StrategyKind::Averaging);
    let slow = RecordingMember::new("member-001", &log);
    coordinator
        .join(member("member-000"), RecordingMember::new("member-000", &log))
        .await
        .unwrap();
    coordinator.join(member("member-001"), slow.clone()).await.unwrap();
    drain(&log);

    slow.set_behavior(Behavior::Hang);
    let response = coordinator
        .join(member("member-002"), RecordingMember::new("member-002", &log))
        .await
        .unwrap();

    assert_eq!(partition_ids(&response.assigned_partitions), vec![2, 3]);
    assert!(!roster.contains(&test_group(), &member("member-001")));
    assert_eq!(
        ownership(&coordinator),
        vec![
            ("member-000".to_string(), vec![0, 1]),
            ("member-002".to_string(), vec![2, 3]),
        ]
    );
    assert!(!coordinator.health().is_degraded());

    // The excluded member has to rejoin before it counts again
    let epoch = coordinator.epoch();
    let heartbeat = coordinator.heartbeat(&member("member-001"), epoch);
    assert!(heartbeat.unwrap_err().is_not_found());
}

#[test(tokio::test)]
async fn test_failed_revoke_excludes_member() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    let broken = RecordingMember::new("member-000", &log);
    coordinator.join(member("member-000"), broken.clone()).await.unwrap();
    coordinator
        .join(member("member-001"), RecordingMember::new("member-001", &log))
        .await
        .unwrap();

    broken.set_behavior(Behavior::Fail);
    coordinator
        .join(member("member-002"), RecordingMember::new("member-002", &log))
        .await
        .unwrap();

    assert_eq!(
        coordinator.describe().members,
        vec![member("member-001"), member("member-002")]
    );
    assert_eq!(
        ownership(&coordinator),
        vec![
            ("member-001".to_string(), vec![0, 1]),
            ("member-002".to_string(), vec![2, 3]),
        ]
    );
}

#[test(tokio::test)]
async fn test_assign_failure_retries_without_failed_member() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    let result = coordinator
        .join(
            member("member-001"),
            RecordingMember::with_behavior("member-001", &log, Behavior::FailAssign),
        )
        .await;

    assert!(matches!(result, Err(CoordinatorError::MemberRejected { .. })));
    // One failed attempt at epoch 2, then a clean retry at epoch 3
    assert_eq!(coordinator.epoch(), Epoch(3));
    assert_eq!(*coordinator.health(), GroupHealth::Healthy);
    assert_eq!(
        ownership(&coordinator),
        vec![("member-000".to_string(), vec![0, 1, 2, 3])]
    );
}

#[test(tokio::test)]
async fn test_exhausted_retries_degrade_then_recover() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(no_retry_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    let result = coordinator
        .join(
            member("member-001"),
            RecordingMember::with_behavior("member-001", &log, Behavior::FailAssign),
        )
        .await;
    assert!(matches!(result, Err(CoordinatorError::MemberRejected { .. })));
    assert!(matches!(
        coordinator.health(),
        GroupHealth::Degraded { attempts: 1, .. }
    ));
    assert!(coordinator.describe().health.is_degraded());

    // A degraded group always takes the next reconciliation
    assert!(coordinator.needs_rebalance());
    assert!(coordinator.reconcile().await);
    assert_eq!(*coordinator.health(), GroupHealth::Healthy);
    assert_eq!(
        ownership(&coordinator),
        vec![("member-000".to_string(), vec![0, 1, 2, 3])]
    );
}

#[test(tokio::test)]
async fn test_wrong_epoch_ack_is_a_failure() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(no_retry_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    let result = coordinator
        .join(
            member("member-001"),
            RecordingMember::with_behavior("member-001", &log, Behavior::WrongEpoch),
        )
        .await;

    assert!(result.is_err());
    match coordinator.health() {
        GroupHealth::Degraded { attempts, reason } => {
            assert_eq!(*attempts, 1);
            assert!(!reason.is_empty());
        }
        GroupHealth::Healthy => panic!("group should be degraded"),
    }
    assert!(coordinator.assignment().partitions_of(&member("member-001")).is_none());
}

#[test(tokio::test)]
async fn test_assign_timeout_counts_as_failure() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(no_retry_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    let result = coordinator
        .join(
            member("member-001"),
            RecordingMember::with_behavior("member-001", &log, Behavior::Hang),
        )
        .await;

    assert!(matches!(result, Err(CoordinatorError::MemberRejected { .. })));
    assert!(coordinator.health().is_degraded());
}

#[test(tokio::test)]
async fn test_missing_topic_degrades_group_until_restored() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;
    drain(&log);

    assert!(catalog.remove_topic(TEST_TOPIC));
    assert!(coordinator.needs_rebalance());
    assert!(coordinator.reconcile().await);
    assert!(matches!(
        coordinator.health(),
        GroupHealth::Degraded { attempts: 2, .. }
    ));
    assert_eq!(coordinator.epoch(), Epoch(1));

    // Nothing was revoked, so the last assignment still stands
    assert!(drain(&log).is_empty());
    assert_eq!(
        ownership(&coordinator),
        vec![("member-000".to_string(), vec![0, 1, 2, 3])]
    );

    let result = coordinator
        .join(member("member-001"), RecordingMember::new("member-001", &log))
        .await;
    assert!(matches!(
        result,
        Err(CoordinatorError::GroupDegraded { attempts: 2, .. })
    ));
    assert!(drain(&log).is_empty());

    catalog
        .provision_topic(TEST_TOPIC, vec![BrokerId(1)], 4)
        .unwrap();
    assert!(coordinator.reconcile().await);
    assert_eq!(*coordinator.health(), GroupHealth::Healthy);
    assert_eq!(coordinator.epoch(), Epoch(2));
    assert_eq!(
        ownership(&coordinator),
        vec![
            ("member-000".to_string(), vec![0, 1]),
            ("member-001".to_string(), vec![2, 3]),
        ]
    );
}
