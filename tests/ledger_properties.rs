//! Property tests for the quota ledger

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use shortcast::models::ApiProject;
use shortcast::quota::{QuotaLedger, Reservation};
use shortcast::storage::{MemoryStore, ProjectRepository, SharedProjectRepository};

#[derive(Debug, Clone)]
enum Op {
    Reserve(u64),
    Commit(usize),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..400).prop_map(Op::Reserve),
        any::<usize>().prop_map(Op::Commit),
        any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn used_never_exceeds_quota_and_matches_commits(
        daily_quota in 0u64..2_000,
        ops in prop::collection::vec(op(), 0..60),
    ) {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        let repo: SharedProjectRepository = store.clone();
        let ledger = QuotaLedger::load(repo, 100).unwrap();
        let project = ApiProject::new("p", daily_quota, now);
        ledger.add_project(&project).unwrap();

        let mut open: Vec<Reservation> = Vec::new();
        let mut committed = 0u64;

        for op in ops {
            match op {
                Op::Reserve(cost) => {
                    let before = ledger.project(project.id).unwrap().quota_used_today;
                    match ledger.try_reserve(project.id, cost) {
                        Ok(r) => open.push(r),
                        Err(_) => {
                            // A refused reservation changes nothing
                            prop_assert!(before + cost > daily_quota);
                            prop_assert_eq!(
                                ledger.project(project.id).unwrap().quota_used_today,
                                before
                            );
                        }
                    }
                }
                Op::Commit(i) if !open.is_empty() => {
                    let r = open.swap_remove(i % open.len());
                    committed += r.cost();
                    ledger.commit(r, now).unwrap();
                }
                Op::Release(i) if !open.is_empty() => {
                    let r = open.swap_remove(i % open.len());
                    ledger.release(r).unwrap();
                }
                _ => {}
            }

            let used = ledger.project(project.id).unwrap().quota_used_today;
            prop_assert!(used <= daily_quota);

            let outstanding: u64 = open.iter().map(|r| r.cost()).sum();
            prop_assert_eq!(ledger.outstanding(project.id), outstanding);
            prop_assert_eq!(used, committed + outstanding);
        }

        for r in open.drain(..) {
            ledger.release(r).unwrap();
        }
        let used = ledger.project(project.id).unwrap().quota_used_today;
        prop_assert_eq!(used, committed);

        // Persisted counters follow the in-memory ones
        let stored = store.get_project(project.id).unwrap().unwrap();
        prop_assert_eq!(stored.quota_used_today, committed);
        let charged: u64 = store.list_charges(project.id).unwrap().iter().map(|c| c.cost).sum();
        prop_assert_eq!(charged, committed);
    }
}
