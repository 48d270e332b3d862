use crate::test_utilities::*;
use keel::{StrategyConfig, StrategyKind, assign, create_strategy};
use proptest::prelude::*;

fn balanced_kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![Just(StrategyKind::Averaging), Just(StrategyKind::Circular)]
}

fn any_kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::Averaging),
        Just(StrategyKind::Circular),
        Just(StrategyKind::ConsistentHash),
        Just(StrategyKind::Static),
    ]
}

proptest! {
    #[test]
    fn test_balanced_strategies_hold_all_invariants(
        n in 1u32..128,
        m in 1usize..40,
        kind in balanced_kind(),
    ) {
        let partitions = create_test_partitions(n);
        let members = create_test_members(m);
        let strategy = create_strategy(&StrategyConfig::new(kind));
        let assignment = assign(strategy.as_ref(), &partitions, &members);

        prop_assert_eq!(assignment.member_count(), m);
        prop_assert_eq!(assignment.assigned_count(), n as usize);
        prop_assert!(assignment.verify("g", &partitions, true).is_ok());
    }

    #[test]
    fn test_every_strategy_is_complete_and_disjoint(
        n in 1u32..96,
        m in 1usize..24,
        kind in any_kind(),
    ) {
        let partitions = create_test_partitions(n);
        let members = create_test_members(m);
        let strategy = create_strategy(&StrategyConfig::new(kind));
        let assignment = assign(strategy.as_ref(), &partitions, &members);

        prop_assert!(assignment.verify("g", &partitions, false).is_ok());
    }

    #[test]
    fn test_assignment_is_deterministic(
        n in 1u32..64,
        m in 1usize..16,
        kind in any_kind(),
    ) {
        let partitions = create_test_partitions(n);
        let members = create_test_members(m);
        let mut shuffled = members.clone();
        shuffled.reverse();

        let strategy = create_strategy(&StrategyConfig::new(kind));
        let first = assign(strategy.as_ref(), &partitions, &members);
        let second = assign(strategy.as_ref(), &partitions, &shuffled);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_averaging_blocks_are_contiguous(n in 1u32..128, m in 1usize..40) {
        let partitions = create_test_partitions(n);
        let members = create_test_members(m);
        let strategy = create_strategy(&StrategyConfig::default());
        let assignment = assign(strategy.as_ref(), &partitions, &members);

        let mut next = 0u32;
        for (_, owned) in assignment.iter() {
            for id in partition_ids(owned) {
                prop_assert_eq!(id, next);
                next += 1;
            }
        }
        prop_assert_eq!(next, n);
    }
}
