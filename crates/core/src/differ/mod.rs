//! Collection differ - computes the operations that converge a destination
//! collection to the resolved source collection.
//!
//! Plans are applied as: all removals first, then insertions in order.
//! Insertion positions refer to the list as it stands when that insertion
//! is applied.

mod types;

pub use types::*;

use std::collections::{HashMap, HashSet};

use crate::cache::MatchResult;
use crate::catalog::CollectionRef;

/// Compute the plan for one collection.
///
/// `source` holds the resolutions in source order; `destination` the
/// current destination IDs in destination order.
pub fn diff(
    collection: &CollectionRef,
    source: &[MatchResult],
    destination: &[String],
    options: &DiffOptions,
) -> SyncPlan {
    let mut seen = HashSet::new();
    let mut excluded_unresolved = 0;
    let mut desired = Vec::new();
    for result in source {
        match result.destination_id() {
            Some(id) => {
                if seen.insert(id) {
                    desired.push(id.to_string());
                }
            }
            None => excluded_unresolved += 1,
        }
    }

    let mut plan = if collection.kind.is_ordered() {
        match options.ordering {
            PlaylistOrdering::Incremental => diff_ordered(&desired, destination, options.mirror),
            PlaylistOrdering::Rebuild => diff_rebuild(&desired, destination, options.mirror),
        }
    } else {
        diff_unordered(&desired, destination, options.mirror)
    };

    plan.collection = collection.clone();
    plan.excluded_unresolved = excluded_unresolved;
    plan
}

/// Destination IDs not in `desired`, first occurrence order, unique.
fn extraneous(desired: &HashSet<&str>, destination: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    destination
        .iter()
        .filter(|id| !desired.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect()
}

fn diff_unordered(desired: &[String], destination: &[String], mirror: bool) -> SyncPlan {
    let present: HashSet<&str> = destination.iter().map(String::as_str).collect();
    let additions: Vec<String> = desired
        .iter()
        .filter(|id| !present.contains(id.as_str()))
        .cloned()
        .collect();

    let removals = if mirror {
        let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();
        extraneous(&wanted, destination)
    } else {
        Vec::new()
    };

    let mut plan = SyncPlan::empty();
    if !additions.is_empty() {
        plan.insertions.push(Insertion {
            position: None,
            ids: additions,
        });
    }
    plan.removals = removals;
    plan
}

/// Incremental playlist diff.
///
/// Each missing item goes right after the nearest preceding source item that
/// is already present; items with no such predecessor go right before the
/// first present source item. Present items are never moved.
fn diff_ordered(desired: &[String], destination: &[String], mirror: bool) -> SyncPlan {
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let removals = if mirror {
        extraneous(&wanted, destination)
    } else {
        Vec::new()
    };

    // destination as it looks once removals are applied
    let remaining: Vec<&str> = destination
        .iter()
        .map(String::as_str)
        .filter(|id| !mirror || wanted.contains(id))
        .collect();
    let present: HashSet<&str> = remaining.iter().copied().collect();

    let mut leading: Vec<&str> = Vec::new();
    let mut after: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut first_present: Option<&str> = None;
    let mut anchor: Option<&str> = None;
    for id in desired.iter().map(String::as_str) {
        if present.contains(id) {
            first_present.get_or_insert(id);
            anchor = Some(id);
        } else {
            match anchor {
                Some(a) => after.entry(a).or_default().push(id),
                None => leading.push(id),
            }
        }
    }

    // (id, is_new) in final order
    let mut target: Vec<(&str, bool)> = Vec::with_capacity(remaining.len() + desired.len());
    let mut placed: HashSet<&str> = HashSet::new();
    for &id in &remaining {
        let first_occurrence = placed.insert(id);
        if first_occurrence && first_present == Some(id) {
            target.extend(leading.drain(..).map(|n| (n, true)));
        }
        target.push((id, false));
        if first_occurrence {
            if let Some(group) = after.remove(id) {
                target.extend(group.into_iter().map(|n| (n, true)));
            }
        }
    }
    // nothing from the source is present yet
    target.extend(leading.into_iter().map(|n| (n, true)));

    let mut plan = SyncPlan::empty();
    plan.insertions = runs_to_insertions(&target);
    plan.removals = removals;
    plan
}

/// Turn runs of new items into positioned insertions. A run reaching the end
/// of the list is an append.
fn runs_to_insertions(target: &[(&str, bool)]) -> Vec<Insertion> {
    let mut insertions = Vec::new();
    let mut i = 0;
    while i < target.len() {
        if !target[i].1 {
            i += 1;
            continue;
        }
        let start = i;
        while i < target.len() && target[i].1 {
            i += 1;
        }
        insertions.push(Insertion {
            position: if i == target.len() { None } else { Some(start) },
            ids: target[start..i].iter().map(|(id, _)| id.to_string()).collect(),
        });
    }
    insertions
}

/// Rebuild playlist diff: when present source items are out of relative
/// order they are removed and everything is re-appended in source order.
/// Otherwise identical to the incremental diff.
fn diff_rebuild(desired: &[String], destination: &[String], mirror: bool) -> SyncPlan {
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let destination_order: Vec<&str> = destination
        .iter()
        .map(String::as_str)
        .filter(|id| wanted.contains(id) && seen.insert(*id))
        .collect();
    let source_order: Vec<&str> = desired
        .iter()
        .map(String::as_str)
        .filter(|id| seen.contains(id))
        .collect();

    if destination_order == source_order {
        return diff_ordered(desired, destination, mirror);
    }

    let mut plan = SyncPlan::empty();
    plan.removals = if mirror {
        extraneous(&wanted, destination)
    } else {
        Vec::new()
    };
    plan.removals
        .extend(destination_order.iter().map(|id| id.to_string()));
    plan.insertions.push(Insertion {
        position: None,
        ids: desired.to_vec(),
    });
    plan.rebuild = true;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Fingerprint, MatchMethod};
    use crate::catalog::ItemKind;

    fn resolved(ids: &[&str]) -> Vec<MatchResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let fp = Fingerprint::from_raw(format!("track:{}", i));
                if id.is_empty() {
                    MatchResult::no_match(fp, format!("s{}", i), ItemKind::Track, 0.3, MatchMethod::FuzzyText)
                } else {
                    MatchResult::matched(fp, format!("s{}", i), ItemKind::Track, *id, 1.0, MatchMethod::Identifier)
                }
            })
            .collect()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn playlist() -> CollectionRef {
        CollectionRef::playlist("p1", "Road trip")
    }

    fn incremental() -> DiffOptions {
        DiffOptions::default()
    }

    fn insertion(position: Option<usize>, list: &[&str]) -> Insertion {
        Insertion {
            position,
            ids: ids(list),
        }
    }

    #[test]
    fn test_empty_destination_appends_everything() {
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &[], &incremental());
        assert_eq!(plan.insertions, vec![insertion(None, &["a", "b", "c"])]);
        assert!(plan.removals.is_empty());
        assert!(!plan.rebuild);
    }

    #[test]
    fn test_missing_item_inserted_after_predecessor() {
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &ids(&["a", "c"]), &incremental());
        assert_eq!(plan.insertions, vec![insertion(Some(1), &["b"])]);
    }

    #[test]
    fn test_leading_items_go_before_first_present() {
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &ids(&["b"]), &incremental());
        assert_eq!(
            plan.insertions,
            vec![insertion(Some(0), &["a"]), insertion(None, &["c"])]
        );
    }

    #[test]
    fn test_runs_are_batched() {
        let plan = diff(
            &playlist(),
            &resolved(&["a", "b", "c", "d", "e"]),
            &ids(&["a", "e"]),
            &incremental(),
        );
        assert_eq!(plan.insertions, vec![insertion(Some(1), &["b", "c", "d"])]);
    }

    #[test]
    fn test_destination_only_items_kept_unless_mirror() {
        let source = resolved(&["a", "b"]);
        let destination = ids(&["x", "a"]);

        let plan = diff(&playlist(), &source, &destination, &incremental());
        assert!(plan.removals.is_empty());
        assert_eq!(plan.insertions, vec![insertion(None, &["b"])]);

        let mirror = DiffOptions {
            mirror: true,
            ..Default::default()
        };
        let plan = diff(&playlist(), &source, &destination, &mirror);
        assert_eq!(plan.removals, ids(&["x"]));
        assert_eq!(plan.insertions, vec![insertion(None, &["b"])]);
    }

    #[test]
    fn test_mirror_positions_account_for_removals() {
        let mirror = DiffOptions {
            mirror: true,
            ..Default::default()
        };
        let plan = diff(
            &playlist(),
            &resolved(&["a", "b", "c"]),
            &ids(&["x", "a", "y", "c"]),
            &mirror,
        );
        assert_eq!(plan.removals, ids(&["x", "y"]));
        // after removals the list is [a, c]
        assert_eq!(plan.insertions, vec![insertion(Some(1), &["b"])]);
    }

    #[test]
    fn test_out_of_order_items_left_alone() {
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &ids(&["c", "a"]), &incremental());
        // b follows a, which sits at the end
        assert_eq!(plan.insertions, vec![insertion(None, &["b"])]);
        assert!(plan.removals.is_empty());

        let plan = diff(&playlist(), &resolved(&["a", "c"]), &ids(&["c", "a"]), &incremental());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_rebuild_reorders() {
        let rebuild = DiffOptions {
            mirror: false,
            ordering: PlaylistOrdering::Rebuild,
        };
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &ids(&["x", "c", "a"]), &rebuild);
        assert!(plan.rebuild);
        assert_eq!(plan.removals, ids(&["c", "a"]));
        assert_eq!(plan.insertions, vec![insertion(None, &["a", "b", "c"])]);

        // in order: same as incremental
        let plan = diff(&playlist(), &resolved(&["a", "b", "c"]), &ids(&["a", "c"]), &rebuild);
        assert!(!plan.rebuild);
        assert_eq!(plan.insertions, vec![insertion(Some(1), &["b"])]);
    }

    #[test]
    fn test_unresolved_and_duplicates() {
        let plan = diff(
            &playlist(),
            &resolved(&["a", "", "a", "b", ""]),
            &[],
            &incremental(),
        );
        assert_eq!(plan.excluded_unresolved, 2);
        assert_eq!(plan.insertions, vec![insertion(None, &["a", "b"])]);
        assert_eq!(plan.addition_count(), 2);
    }

    #[test]
    fn test_unordered_never_removes_without_mirror() {
        let favorites = CollectionRef::favorite_tracks();
        let plan = diff(&favorites, &resolved(&["a", "b"]), &ids(&["z", "b", "y"]), &incremental());
        assert!(plan.removals.is_empty());
        assert_eq!(plan.insertions, vec![insertion(None, &["a"])]);

        let mirror = DiffOptions {
            mirror: true,
            ..Default::default()
        };
        let plan = diff(&favorites, &resolved(&["a", "b"]), &ids(&["z", "b", "y"]), &mirror);
        assert_eq!(plan.removals, ids(&["z", "y"]));
    }

    #[test]
    fn test_idempotent_when_converged() {
        let source = resolved(&["a", "b", "c"]);
        for options in [
            incremental(),
            DiffOptions {
                mirror: true,
                ordering: PlaylistOrdering::Rebuild,
            },
        ] {
            let plan = diff(&playlist(), &source, &ids(&["a", "b", "c"]), &options);
            assert!(plan.is_empty());
            assert_eq!(plan.collection.id, "p1");
        }
    }

    #[test]
    fn test_applying_plan_converges() {
        let source = resolved(&["a", "b", "c", "d", "e", "f"]);
        let destination = ids(&["x", "c", "e"]);
        let plan = diff(&playlist(), &source, &destination, &incremental());

        let mut list = destination.clone();
        list.retain(|id| !plan.removals.contains(id));
        for insertion in &plan.insertions {
            let at = insertion.position.unwrap_or(list.len());
            for (offset, id) in insertion.ids.iter().enumerate() {
                list.insert(at + offset, id.clone());
            }
        }
        assert_eq!(list, ids(&["x", "a", "b", "c", "d", "e", "f"]));

        let again = diff(&playlist(), &source, &list, &incremental());
        assert!(again.is_empty());
    }
}
