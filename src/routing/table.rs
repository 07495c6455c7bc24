//! The [`RoutingTable`] implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tracing::debug;

use crate::clock::{duration_millis, now_millis};

/// Deduplicated adjacency snapshot: address to neighbor addresses.
pub type Graph = HashMap<String, Vec<String>>;

/// A single observation of a link between two addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The address on the other end of the link.
    pub neighbor: String,
    /// When the link was observed, in milliseconds since the Unix epoch.
    pub learned_at: i64,
}

/// Adjacency list of edges learned from envelope paths.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use starwave_core::routing::RoutingTable;
///
/// let mut table = RoutingTable::new(Duration::from_secs(3600));
/// table.add_routes(&["a".to_string(), "b".to_string(), "c".to_string()]);
/// assert_eq!(table.find_shortest_routes("a", "c"), vec!["a", "b", "c"]);
/// ```
#[derive(Debug, Clone)]
pub struct RoutingTable {
    edges: HashMap<String, Vec<Edge>>,
    expiration: Duration,
}

impl RoutingTable {
    /// Creates an empty table whose edges expire after `expiration`.
    #[must_use]
    pub fn new(expiration: Duration) -> Self {
        Self {
            edges: HashMap::new(),
            expiration,
        }
    }

    /// Returns the edge expiration window.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Returns the number of vertices with at least one edge.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if no edges have been learned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Returns the distinct neighbors of `address`, in first-seen order.
    #[must_use]
    pub fn neighbors(&self, address: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.edges
            .get(address)
            .into_iter()
            .flatten()
            .filter(|edge| seen.insert(edge.neighbor.as_str()))
            .map(|edge| edge.neighbor.clone())
            .collect()
    }

    /// Records every consecutive pair in `path` as a bidirectional edge
    /// observed now.
    pub fn add_routes(&mut self, path: &[String]) {
        self.add_routes_at(path, now_millis());
    }

    /// Records every consecutive pair in `path` as a bidirectional edge
    /// observed at `now`.
    pub fn add_routes_at(&mut self, path: &[String], now: i64) {
        for pair in path.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a == b {
                continue;
            }
            self.push_edge(a, b, now);
            self.push_edge(b, a, now);
        }
    }

    fn push_edge(&mut self, from: &str, to: &str, now: i64) {
        self.edges.entry(from.to_string()).or_default().push(Edge {
            neighbor: to.to_string(),
            learned_at: now,
        });
    }

    /// Drops edges older than the expiration window.
    pub fn gc(&mut self) {
        self.gc_at(now_millis());
    }

    /// Drops edges learned before `now` minus the expiration window, and any
    /// vertex left without edges.
    pub fn gc_at(&mut self, now: i64) {
        let cutoff = now.saturating_sub(duration_millis(self.expiration));
        let mut removed = 0usize;

        self.edges.retain(|_, edges| {
            let before = edges.len();
            edges.retain(|edge| edge.learned_at >= cutoff);
            removed += before - edges.len();
            !edges.is_empty()
        });

        if removed > 0 {
            debug!(removed, vertices = self.edges.len(), "Expired routing edges");
        }
    }

    /// Builds a deduplicated adjacency snapshot of the current edges.
    #[must_use]
    pub fn build_graph(&self) -> Graph {
        self.edges
            .keys()
            .map(|address| (address.clone(), self.neighbors(address)))
            .collect()
    }

    /// Finds a shortest path from `from` to `to`, endpoints inclusive.
    ///
    /// Returns `[from]` when both are equal and an empty vector when `to` is
    /// unreachable. Among several shortest paths the first one discovered
    /// wins.
    #[must_use]
    pub fn find_shortest_routes(&self, from: &str, to: &str) -> Vec<String> {
        if from == to {
            return vec![from.to_string()];
        }

        let graph = self.build_graph();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<Vec<&str>> = VecDeque::from([vec![from]]);

        while let Some(path) = queue.pop_front() {
            let Some(&last) = path.last() else {
                continue;
            };
            let Some(neighbors) = graph.get(last) else {
                continue;
            };

            for neighbor in neighbors {
                if !visited.insert(neighbor.as_str()) {
                    continue;
                }
                let mut next = path.clone();
                next.push(neighbor.as_str());
                if neighbor == to {
                    return next.into_iter().map(str::to_string).collect();
                }
                queue.push_back(next);
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn path(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn new_table_is_empty() {
        let table = RoutingTable::new(HOUR);
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.expiration(), HOUR);
    }

    #[test]
    fn single_element_path_is_noop() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a"]));
        table.add_routes(&[]);
        assert!(table.is_empty());
    }

    #[test]
    fn add_routes_is_bidirectional() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "b", "c"]));
        assert_eq!(table.neighbors("a"), vec!["b"]);
        assert_eq!(table.neighbors("b"), vec!["a", "c"]);
        assert_eq!(table.neighbors("c"), vec!["b"]);
    }

    #[test]
    fn build_graph_deduplicates_neighbors() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "b"]));
        table.add_routes(&path(&["a", "b"]));
        table.add_routes(&path(&["a", "c"]));

        let graph = table.build_graph();
        assert_eq!(graph["a"], vec!["b", "c"]);
        assert_eq!(graph["b"], vec!["a"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn shortest_route_to_self() {
        let table = RoutingTable::new(HOUR);
        assert_eq!(table.find_shortest_routes("x", "x"), vec!["x"]);
    }

    #[test]
    fn shortest_route_unreachable_is_empty() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "b"]));
        table.add_routes(&path(&["c", "d"]));
        assert!(table.find_shortest_routes("a", "d").is_empty());
        assert!(table.find_shortest_routes("a", "zz").is_empty());
        assert!(table.find_shortest_routes("zz", "a").is_empty());
    }

    #[test]
    fn shortest_route_prefers_fewer_hops() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "b", "c", "d", "e"]));
        table.add_routes(&path(&["a", "x", "e"]));
        assert_eq!(table.find_shortest_routes("a", "e"), path(&["a", "x", "e"]));
        assert_eq!(table.find_shortest_routes("e", "a"), path(&["e", "x", "a"]));
    }

    #[test]
    fn shortest_route_first_discovered_wins_ties() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "b", "d"]));
        table.add_routes(&path(&["a", "c", "d"]));
        assert_eq!(table.find_shortest_routes("a", "d"), path(&["a", "b", "d"]));
    }

    #[test]
    fn gc_removes_expired_edges_only() {
        let mut table = RoutingTable::new(Duration::from_secs(10));
        table.add_routes_at(&path(&["a", "b"]), 1_000);
        table.add_routes_at(&path(&["b", "c"]), 9_000);

        table.gc_at(12_000);

        assert!(table.neighbors("a").is_empty());
        assert_eq!(table.neighbors("b"), vec!["c"]);
        assert_eq!(table.len(), 2);
        assert!(table.find_shortest_routes("a", "c").is_empty());
    }

    #[test]
    fn gc_keeps_refreshed_edges() {
        let mut table = RoutingTable::new(Duration::from_secs(10));
        table.add_routes_at(&path(&["a", "b"]), 1_000);
        table.add_routes_at(&path(&["a", "b"]), 10_000);

        table.gc_at(15_000);

        assert_eq!(table.neighbors("a"), vec!["b"]);
        assert_eq!(table.edges["a"].len(), 1);
    }

    #[test]
    fn gc_can_empty_table() {
        let mut table = RoutingTable::new(Duration::from_secs(1));
        table.add_routes_at(&path(&["a", "b", "c"]), 0);
        table.gc_at(5_000);
        assert!(table.is_empty());
    }

    #[test]
    fn self_pairs_are_ignored() {
        let mut table = RoutingTable::new(HOUR);
        table.add_routes(&path(&["a", "a", "b"]));
        assert_eq!(table.neighbors("a"), vec!["b"]);
    }
}
