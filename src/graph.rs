use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::catalog::Catalog;
use crate::error::{EngineError, Result};

lazy_static! {
    /// Process-wide graph cache keyed by course id. Content is read-only at
    /// runtime, so a built graph is kept for the lifetime of the process.
    static ref GRAPH_CACHE: RwLock<HashMap<String, Arc<TopicGraph>>> = RwLock::new(HashMap::new());
}

/// Undirected weighted affinity graph over the topics of one course.
/// Supports splitting a topic set into two groups of maximal internal
/// affinity, used to build weakest-link probe groups.
#[derive(Debug)]
pub struct TopicGraph {
    weights: HashMap<(String, String), f64>,
}

impl TopicGraph {
    fn edge_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Edge weight, 0 when the edge is absent. Symmetric.
    pub fn weight(&self, a: &str, b: &str) -> f64 {
        self.weights
            .get(&Self::edge_key(a, b))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of pairwise weights inside a group.
    fn group_weight(&self, group: &[&str]) -> f64 {
        let mut weight = 0.0;
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                weight += self.weight(group[i], group[j]);
            }
        }
        weight
    }

    /// Partition `topics` into two groups (|A| = n/2 rounded down) maximizing
    /// the sum of internal affinities. Enumeration is exhaustive; topic sets
    /// here never exceed a handful of elements. Ties resolve to the
    /// lexicographically smallest first group.
    pub fn bisect(&self, topics: &BTreeSet<String>) -> (BTreeSet<String>, BTreeSet<String>) {
        let sorted: Vec<&str> = topics.iter().map(String::as_str).collect();
        match sorted.len() {
            0 => return (BTreeSet::new(), BTreeSet::new()),
            1 | 2 => {
                let first: BTreeSet<String> = sorted.iter().take(1).map(|s| s.to_string()).collect();
                let second: BTreeSet<String> = sorted.iter().skip(1).map(|s| s.to_string()).collect();
                return (first, second);
            }
            _ => {}
        }

        let half = sorted.len() / 2;
        let mut best_weight = f64::NEG_INFINITY;
        let mut best: Vec<usize> = Vec::new();
        for subset in k_subsets(sorted.len(), half) {
            let group_a: Vec<&str> = subset.iter().map(|&i| sorted[i]).collect();
            let group_b: Vec<&str> = (0..sorted.len())
                .filter(|i| !subset.contains(i))
                .map(|i| sorted[i])
                .collect();
            let weight = self.group_weight(&group_a) + self.group_weight(&group_b);
            // Strict comparison keeps the first (lexicographically smallest)
            // subset on ties.
            if weight > best_weight {
                best_weight = weight;
                best = subset;
            }
        }

        let group_a: BTreeSet<String> = best.iter().map(|&i| sorted[i].to_string()).collect();
        let group_b: BTreeSet<String> = (0..sorted.len())
            .filter(|i| !best.contains(i))
            .map(|i| sorted[i].to_string())
            .collect();
        (group_a, group_b)
    }
}

/// All k-element index subsets of 0..n in lexicographic order.
fn k_subsets(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut subsets = Vec::new();
    let mut current = Vec::with_capacity(k);
    fn recurse(n: usize, k: usize, start: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            recurse(n, k, i + 1, current, out);
            current.pop();
        }
    }
    recurse(n, k, 0, &mut current, &mut subsets);
    subsets
}

/// Build (or fetch) the topic graph of a course. A course without any edges
/// is treated as a content-authoring error.
pub fn load_topic_graph(catalog: &Catalog, course_id: &str) -> Result<Arc<TopicGraph>> {
    if let Some(graph) = GRAPH_CACHE.read().get(course_id) {
        return Ok(Arc::clone(graph));
    }

    let mut weights = HashMap::new();
    for edge in catalog.edges_for_course(course_id) {
        weights.insert(TopicGraph::edge_key(&edge.topic1, &edge.topic2), edge.weight);
    }
    if weights.is_empty() {
        return Err(EngineError::inconsistency(format!(
            "course {course_id} has no topic graph edges"
        )));
    }
    let graph = Arc::new(TopicGraph { weights });
    GRAPH_CACHE
        .write()
        .insert(course_id.to_string(), Arc::clone(&graph));
    tracing::info!(course = course_id, "Topic graph loaded");
    Ok(graph)
}
