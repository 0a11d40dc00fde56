use std::collections::HashSet;

/// Split feed ids into `workers` disjoint queues, round-robin.
///
/// Order within each queue follows the input order. Repeated ids are dropped
/// so no feed is fetched twice in one run. `workers == 0` is treated as 1.
///
/// # Examples
///
/// ```
/// use feedpipe::dispatch::partition_feeds;
///
/// let queues = partition_feeds(&[1, 2, 3, 4, 5], 2);
/// assert_eq!(queues, vec![vec![1, 3, 5], vec![2, 4]]);
/// ```
pub fn partition_feeds(ids: &[i64], workers: usize) -> Vec<Vec<i64>> {
    let workers = workers.max(1);
    let mut queues = vec![Vec::new(); workers];
    let mut seen = HashSet::with_capacity(ids.len());

    let unique = ids.iter().copied().filter(|id| seen.insert(*id));
    for (i, id) in unique.enumerate() {
        queues[i % workers].push(id);
    }

    queues
}
