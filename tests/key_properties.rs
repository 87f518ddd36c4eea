mod util;
use util::*;

use proptest::prelude::*;
use sieve_node_registry::prelude::*;
use sieve_node_registry::registry::{NeedMark, NewNodes, RegistryMap};

fn mark() -> impl Strategy<Value = NeedMark> {
    prop_oneof![
        Just(NeedMark::Unknown),
        Just(NeedMark::Needed),
        Just(NeedMark::NotNeeded),
        Just(NeedMark::NeededOverridesNotNeeded),
    ]
}

fn element() -> impl Strategy<Value = EntityKey> {
    (1u8..4, 1u64..50).prop_map(|(r, id)| EntityKey::new(EntityRank::from_u8(r).unwrap(), pid(id)))
}

proptest! {
    #[test]
    fn key_is_independent_of_member_order(
        ids in proptest::collection::btree_set(1u64..1000, 1..=4),
        rot in 0usize..4,
    ) {
        let mut fwd: Vec<u64> = ids.iter().copied().collect();
        let mut a = SubEntityKey::empty(EntityRank::Node);
        for &i in &fwd {
            a.insert(pid(i)).unwrap();
        }
        fwd.reverse();
        let n = fwd.len();
        fwd.rotate_left(rot % n);
        let mut b = SubEntityKey::empty(EntityRank::Node);
        for &i in &fwd {
            b.insert(pid(i)).unwrap();
            // Duplicates never change the key.
            b.insert(pid(i)).unwrap();
        }
        prop_assert_eq!(a, b);
        let members: Vec<u64> = a.iter().map(PointId::get).collect();
        prop_assert_eq!(members, ids.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn owner_is_highest_rank_then_lowest_id(
        visitors in proptest::collection::vec(element(), 1..12),
    ) {
        let mut key = SubEntityKey::empty(EntityRank::Node);
        key.insert(pid(7)).unwrap();
        key.insert(pid(8)).unwrap();
        let mut map = RegistryMap::new();
        for (ord, &e) in visitors.iter().enumerate() {
            map.insert_or_update(e, key, ord % 4, &NeededEntity::edge_midpoints(), true);
        }
        let best = visitors
            .iter()
            .copied()
            .min_by_key(|e| (std::cmp::Reverse(e.rank), e.id))
            .unwrap();
        prop_assert_eq!(map.lookup(&key).unwrap().owner.key(), Some(best));

        // Same result in reverse order.
        let mut rev = RegistryMap::new();
        for &e in visitors.iter().rev() {
            rev.insert_or_update(e, key, 0, &NeededEntity::edge_midpoints(), true);
        }
        prop_assert_eq!(rev.lookup(&key).unwrap().owner.key(), Some(best));
    }

    #[test]
    fn need_marks_form_a_semilattice(a in mark(), b in mark(), c in mark()) {
        prop_assert_eq!(a.merge(b), b.merge(a));
        prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        prop_assert_eq!(a.merge(a), a);
        prop_assert_eq!(NeedMark::Unknown.merge(a), a);
    }

    #[test]
    fn only_unanimous_not_needed_suppresses(votes in proptest::collection::vec(any::<bool>(), 1..10)) {
        let m = votes
            .iter()
            .fold(NeedMark::Unknown, |acc, &v| acc.merge(NeedMark::from_need(v)));
        prop_assert_eq!(m.is_only_not_needed(), votes.iter().all(|v| !v));
        prop_assert_eq!(m.is_needed(), votes.iter().any(|&v| v));
    }

    #[test]
    fn placeholders_stay_in_lock_step(
        n in 1usize..6,
        ops in proptest::collection::vec((0usize..6, 0u8..3, 1u64..100), 0..20),
    ) {
        let mut nodes = NewNodes::unresolved(n);
        for (i, op, id) in ops {
            let i = i % n;
            match op {
                0 => nodes.resolve(i, pid(id)),
                1 => {
                    nodes.attach(i);
                }
                _ => nodes.detach(pid(id)),
            }
            prop_assert!(nodes.validate().is_ok());
            prop_assert_eq!(nodes.slots().len(), nodes.ids().len());
        }
        let dropped = nodes.retain_ids(|id| id.is_some_and(|p| p.get() % 2 == 0));
        prop_assert!(nodes.validate().is_ok());
        prop_assert_eq!(nodes.len() + dropped, n);
    }
}
