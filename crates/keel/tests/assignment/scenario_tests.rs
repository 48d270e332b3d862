use crate::test_utilities::*;
use keel::assignment::AveragingStrategy;
use keel::{
    Assignment, InMemoryPartitionCatalog, MembershipRoster, PartitionCatalog, StrategyConfig,
    StrategyKind, TopicSpec, assign, create_strategy, BrokerId, GroupId,
};
use test_log::test;

fn averaged(n: u32, m: usize) -> Vec<Vec<u32>> {
    let assignment = assign(
        &AveragingStrategy::new(),
        &create_test_partitions(n),
        &create_test_members(m),
    );
    assignment
        .iter()
        .map(|(_, owned)| partition_ids(owned))
        .collect()
}

#[test]
fn test_four_partitions_one_member() {
    assert_eq!(averaged(4, 1), vec![vec![0, 1, 2, 3]]);
}

#[test]
fn test_four_partitions_two_members() {
    assert_eq!(averaged(4, 2), vec![vec![0, 1], vec![2, 3]]);
}

#[test]
fn test_four_partitions_three_members() {
    assert_eq!(averaged(4, 3), vec![vec![0, 1], vec![2], vec![3]]);
}

#[test]
fn test_four_partitions_five_members_leaves_one_idle() {
    let result = averaged(4, 5);
    assert_eq!(
        result,
        vec![vec![0], vec![1], vec![2], vec![3], Vec::<u32>::new()]
    );

    let assignment = assign(
        &AveragingStrategy::new(),
        &create_test_partitions(4),
        &create_test_members(5),
    );
    assert_eq!(
        assignment.idle_members(),
        vec![&create_test_members(5)[4]]
    );
}

#[test]
fn test_eight_partitions_three_members() {
    assert_eq!(
        averaged(8, 3),
        vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7]]
    );
}

#[test]
fn test_join_moves_tail_partitions_to_new_member() {
    let partitions = create_test_partitions(4);
    let members = create_test_members(2);
    let strategy = AveragingStrategy::new();

    let before = assign(&strategy, &partitions, &members[..1]);
    let after = assign(&strategy, &partitions, &members);
    let moves = before.movements(&after);

    assert_eq!(partition_ids(&moves[&members[0]].released), vec![2, 3]);
    assert_eq!(partition_ids(&moves[&members[1]].acquired), vec![2, 3]);
}

#[test]
fn test_recompute_without_change_is_identical() {
    let partitions = create_test_partitions(7);
    let members = create_test_members(3);
    for kind in [
        StrategyKind::Averaging,
        StrategyKind::Circular,
        StrategyKind::ConsistentHash,
        StrategyKind::Static,
    ] {
        let strategy = create_strategy(&StrategyConfig::new(kind));
        let first = assign(strategy.as_ref(), &partitions, &members);
        let second = assign(strategy.as_ref(), &partitions, &members);
        assert_eq!(first, second, "strategy {kind} churned without change");
        assert!(first.movements(&second).is_empty());
    }
}

#[test]
fn test_roster_and_catalog_feed_assignment() {
    let catalog = InMemoryPartitionCatalog::with_topics(vec![TopicSpec {
        name: "orders".to_string(),
        brokers: vec![BrokerId(1), BrokerId(2)],
        partition_count: 8,
    }])
    .unwrap();
    let roster = MembershipRoster::new(chrono::Duration::seconds(10));
    let group = GroupId::new_unchecked("billing");
    for member in create_test_members(3).iter().rev() {
        roster.join(&group, member).unwrap();
    }

    let partitions = catalog.partitions_of("orders").unwrap();
    let assignment: Assignment = assign(
        &AveragingStrategy::new(),
        &partitions,
        &roster.members(&group),
    );

    assert!(assignment.verify("billing", &partitions, true).is_ok());
    let first = assignment.partitions_of(&create_test_members(3)[0]).unwrap();
    assert_eq!(partition_ids(first), vec![0, 1, 2]);

    catalog.add_partitions("orders", 1).unwrap();
    let grown = catalog.partitions_of("orders").unwrap();
    let regrown = assign(&AveragingStrategy::new(), &grown, &roster.members(&group));
    assert!(regrown.verify("billing", &grown, true).is_ok());
    assert_eq!(regrown.assigned_count(), 9);
}
