//! Least-loaded reviewer selection.
//!
//! Candidates are ranked by `(open review count, user id)` ascending and the
//! first `count` ids are taken. The ordering is total, so identical inputs
//! always yield identical output regardless of candidate arrival order.

use std::collections::HashMap;

/// Pick up to `count` reviewers from `candidates`.
///
/// A candidate absent from `workload` is treated as having no open reviews.
/// Duplicate candidate ids are collapsed.
pub fn select_reviewers(
    candidates: &[String],
    workload: &HashMap<String, u32>,
    count: usize,
) -> Vec<String> {
    let mut ranked: Vec<(u32, &str)> = candidates
        .iter()
        .map(|id| (workload.get(id).copied().unwrap_or(0), id.as_str()))
        .collect();
    ranked.sort_unstable();
    ranked.dedup_by(|a, b| a.1 == b.1);

    ranked
        .into_iter()
        .take(count)
        .map(|(_, id)| id.to_string())
        .collect()
}

/// Pick the single least-loaded reviewer, if any.
pub fn select_reviewer(candidates: &[String], workload: &HashMap<String, u32>) -> Option<String> {
    select_reviewers(candidates, workload, 1).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn load(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_picks_lowest_workload_first() {
        let chosen = select_reviewers(
            &ids(&["b", "c", "d"]),
            &load(&[("b", 3), ("c", 0), ("d", 1)]),
            2,
        );
        assert_eq!(chosen, ids(&["c", "d"]));
    }

    #[test]
    fn test_ties_break_by_user_id() {
        let chosen = select_reviewers(&ids(&["d", "b", "c"]), &load(&[]), 2);
        assert_eq!(chosen, ids(&["b", "c"]));
    }

    #[test]
    fn test_result_is_independent_of_arrival_order() {
        let workload = load(&[("u1", 2), ("u2", 1), ("u3", 1), ("u4", 0)]);
        let forward = select_reviewers(&ids(&["u1", "u2", "u3", "u4"]), &workload, 2);
        let backward = select_reviewers(&ids(&["u4", "u3", "u2", "u1"]), &workload, 2);
        assert_eq!(forward, backward);
        assert_eq!(forward, ids(&["u4", "u2"]));
    }

    #[test]
    fn test_fewer_candidates_than_requested() {
        assert_eq!(select_reviewers(&ids(&["x"]), &load(&[]), 2), ids(&["x"]));
        assert!(select_reviewers(&[], &load(&[]), 2).is_empty());
    }

    #[test]
    fn test_zero_count_selects_nobody() {
        assert!(select_reviewers(&ids(&["a", "b"]), &load(&[]), 0).is_empty());
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let chosen = select_reviewers(&ids(&["a", "a", "b"]), &load(&[]), 2);
        assert_eq!(chosen, ids(&["a", "b"]));
    }

    #[test]
    fn test_single_pick_uses_same_rule() {
        let workload = load(&[("c", 1), ("d", 0)]);
        assert_eq!(select_reviewer(&ids(&["c", "d"]), &workload), Some("d".to_string()));
        assert_eq!(select_reviewer(&[], &workload), None);
    }
}
