use crate::test_utilities::*;
use chrono::{Duration, Utc};
use keel::{Epoch, KeelError, StrategyKind};
use keel_coordinator::{CoordinatorError, HeartbeatResponse};
use test_log::test;

#[test(tokio::test)]
async fn test_heartbeat_epoch_checks() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000", "member-001"]).await;
    assert_eq!(coordinator.epoch(), Epoch(2));

    let current = coordinator.heartbeat(&member("member-000"), Epoch(2)).unwrap();
    assert_eq!(current, HeartbeatResponse::Ok);

    let behind = coordinator.heartbeat(&member("member-000"), Epoch(1)).unwrap();
    assert_eq!(behind, HeartbeatResponse::RejoinRequired { epoch: Epoch(2) });

    let ahead = coordinator.heartbeat(&member("member-001"), Epoch(7));
    assert!(matches!(
        ahead,
        Err(CoordinatorError::StaleEpoch {
            current_epoch: 2,
            stale_epoch: 7,
            ..
        })
    ));

    let unknown = coordinator.heartbeat(&member("ghost"), Epoch(2));
    assert!(matches!(
        unknown,
        Err(CoordinatorError::Membership(KeelError::UnknownMember { .. }))
    ));
}

#[test(tokio::test)]
async fn test_heartbeats_never_trigger_rebalance() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;
    drain(&log);

    for _ in 0..5 {
        coordinator.heartbeat(&member("member-000"), Epoch(1)).unwrap();
    }
    assert!(drain(&log).is_empty());
    assert!(!coordinator.needs_rebalance());
}

#[test(tokio::test)]
async fn test_fetch_assignment() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000", "member-001"]).await;

    let view = coordinator.fetch_assignment(&member("member-001")).unwrap();
    assert_eq!(view.member_id, member("member-001"));
    assert_eq!(view.epoch, Epoch(2));
    assert_eq!(partition_ids(&view.partitions), vec![2, 3]);

    let error = coordinator.fetch_assignment(&member("ghost")).unwrap_err();
    assert!(error.is_not_found());
}

#[test(tokio::test)]
async fn test_duplicate_join_is_rejected() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    let result = coordinator
        .join(member("member-000"), RecordingMember::new("member-000", &log))
        .await;
    assert!(matches!(
        result,
        Err(CoordinatorError::Membership(KeelError::DuplicateMember { .. }))
    ));
    assert_eq!(coordinator.epoch(), Epoch(1));
}

#[test(tokio::test)]
async fn test_expire_drops_silent_members() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let (mut coordinator, roster) =
        create_test_coordinator_with_roster(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000", "member-001"]).await;
    drain(&log);

    let later = Utc::now() + Duration::hours(1);
    roster
        .heartbeat_at(&test_group(), &member("member-001"), later)
        .unwrap();

    let removed = coordinator.expire(later).await;
    assert_eq!(removed, vec![member("member-000")]);
    assert_eq!(coordinator.epoch(), Epoch(3));
    assert_eq!(
        ownership(&coordinator),
        vec![("member-001".to_string(), vec![0, 1, 2, 3])]
    );

    // The expired member is no longer reachable, so it gets no revoke
    let commands = drain(&log);
    assert!(commands.iter().all(|c| c.member() == "member-001"));

    assert!(coordinator.expire(later).await.is_empty());
    assert_eq!(coordinator.epoch(), Epoch(3));
}

#[test(tokio::test)]
async fn test_last_member_leaving_empties_the_group() {
    let log = new_command_log();
    let catalog = create_test_catalog(4);
    let mut coordinator = create_test_coordinator(create_test_config(), &catalog, StrategyKind::Averaging);
    join_all_members(&mut coordinator, &log, &["member-000"]).await;

    coordinator.leave(&member("member-000")).await.unwrap();
    assert!(coordinator.assignment().is_empty());
    assert!(!coordinator.health().is_degraded());

    let again = coordinator.leave(&member("member-000")).await;
    assert!(again.unwrap_err().is_not_found());
}
