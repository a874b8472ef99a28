#[cfg(test)]
mod tests {
    use crate::manifest::IntervalTree;
    use crate::timeuuid::{EntropyKind, TimeUuid};

    fn lo(t: u64) -> TimeUuid {
        TimeUuid::from_time(t, EntropyKind::Lowest)
    }

    fn hi(t: u64) -> TimeUuid {
        TimeUuid::from_time(t, EntropyKind::Highest)
    }

    fn tree(intervals: &[(u64, u64)]) -> IntervalTree {
        IntervalTree::build(intervals.iter().map(|&(s, e)| (lo(s), hi(e))).collect())
    }

    fn overlap_times(tree: &IntervalTree, qs: u64, qe: u64) -> Vec<(u64, u64)> {
        let mut out: Vec<(u64, u64)> = tree
            .overlap(&lo(qs), &hi(qe))
            .into_iter()
            .map(|(s, e)| (s.timestamp(), e.timestamp()))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_empty_tree() {
        let tree = IntervalTree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.overlap(&lo(0), &hi(100)).is_empty());
    }

    #[test]
    fn test_overlap_counts_match_reference() {
        let tree = tree(&[(100, 1100), (200, 1200), (500, 1500), (1400, 2400)]);
        assert_eq!(tree.len(), 4);

        assert_eq!(overlap_times(&tree, 150, 300).len(), 2);
        assert_eq!(overlap_times(&tree, 400, 600).len(), 3);
        assert_eq!(overlap_times(&tree, 100, 1500).len(), 4);
        assert_eq!(overlap_times(&tree, 2000, 2100).len(), 1);
    }

    #[test]
    fn test_overlap_is_exact() {
        let intervals = [(100u64, 1100u64), (200, 1200), (500, 1500), (1400, 2400)];
        let tree = tree(&intervals);

        for (qs, qe) in [(150, 300), (400, 600), (100, 1500), (2000, 2100), (0, 50)] {
            let got = overlap_times(&tree, qs, qe);
            let mut expected: Vec<(u64, u64)> = intervals
                .iter()
                .copied()
                .filter(|&(s, e)| s <= qe && e >= qs)
                .collect();
            expected.sort_unstable();
            assert_eq!(got, expected, "query [{qs}, {qe}]");
        }
    }

    #[test]
    fn test_disjoint_query_is_empty() {
        let tree = tree(&[(100, 200), (300, 400)]);
        assert!(overlap_times(&tree, 201, 299).is_empty());
        assert!(overlap_times(&tree, 500, 600).is_empty());
    }

    #[test]
    fn test_many_nested_intervals() {
        let intervals: Vec<(u64, u64)> = (0..100).map(|i| (i * 10, i * 10 + 1000)).collect();
        let tree = tree(&intervals);

        let got = overlap_times(&tree, 995, 1005);
        let expected: Vec<(u64, u64)> = intervals
            .iter()
            .copied()
            .filter(|&(s, e)| s <= 1005 && e >= 995)
            .collect();
        assert_eq!(got.len(), expected.len());
    }
}
