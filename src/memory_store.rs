//! In-Memory Graph
//!
//! A `GraphStore` that keeps the property graph in process. It follows the
//! same merge semantics as the Cypher statements in `neo4j_storage`, which
//! makes it the backend for dry runs and for exercising the pipeline in
//! tests.

use crate::error::{ImportError, ImportResult};
use crate::graph_store::{
    Attrs, GraphStore, IndexSpec, KeyValue, MergeOp, NodeKey, StoreSession, Value,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type Props = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub rel_type: &'static str,
    pub from: NodeKey,
    pub to: NodeKey,
}

/// Failure to inject into upcoming transactions.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Connectivity,
    Constraint,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<NodeKey, Props>,
    edges: HashMap<EdgeKey, Props>,
    /// (label, attribute, value) of key-like node attributes.
    aliases: HashMap<(&'static str, &'static str, KeyValue), NodeKey>,
    indexes: BTreeSet<IndexSpec>,
    open_sessions: usize,
    sessions_opened: usize,
    committed_transactions: usize,
    #[cfg(test)]
    pending_failures: std::collections::VecDeque<InjectedFailure>,
}

impl GraphState {
    #[cfg(test)]
    fn take_injected_failure(&mut self) -> Option<ImportError> {
        self.pending_failures.pop_front().map(|failure| match failure {
            InjectedFailure::Connectivity => ImportError::connectivity("injected connection reset"),
            InjectedFailure::Constraint => ImportError::constraint("injected constraint violation"),
        })
    }

    #[cfg(not(test))]
    fn take_injected_failure(&mut self) -> Option<ImportError> {
        None
    }

    /// Find the node a `MERGE (n:Label {property: value})` would match:
    /// the node keyed that way, or else the first node of that label
    /// carrying the value as an attribute.
    fn resolve(&self, key: &NodeKey) -> NodeKey {
        if self.nodes.contains_key(key) {
            return key.clone();
        }
        self.aliases
            .get(&(key.label, key.property, key.value.clone()))
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    /// Merge a node and return the key it is stored under.
    fn merge_node(&mut self, key: &NodeKey) -> NodeKey {
        let resolved = self.resolve(key);
        self.nodes.entry(resolved.clone()).or_default();
        resolved
    }

    fn set_node_attrs(&mut self, node: &NodeKey, attrs: &Attrs) {
        for (name, value) in attrs {
            let previous = self
                .nodes
                .entry(node.clone())
                .or_default()
                .insert(name.to_string(), value.clone());

            if let Some(old) = previous.as_ref().and_then(as_key_value) {
                let alias = (node.label, *name, old);
                if self.aliases.get(&alias) == Some(node) {
                    self.aliases.remove(&alias);
                }
            }
            if let Some(new) = as_key_value(value) {
                self.aliases
                    .entry((node.label, *name, new))
                    .or_insert_with(|| node.clone());
            }
        }
    }

    fn apply(&mut self, op: &MergeOp) {
        match op {
            MergeOp::Node { node, attrs } => {
                let node = self.merge_node(node);
                self.set_node_attrs(&node, attrs);
            }
            MergeOp::Edge {
                rel_type,
                from,
                to,
                attrs,
            } => {
                let key = EdgeKey {
                    rel_type: *rel_type,
                    from: self.merge_node(from),
                    to: self.merge_node(to),
                };
                let props = self.edges.entry(key).or_default();
                for (name, value) in attrs {
                    props.insert(name.to_string(), value.clone());
                }
            }
        }
    }
}

fn as_key_value(value: &Value) -> Option<KeyValue> {
    match value {
        Value::Int(v) => Some(KeyValue::Int(*v)),
        Value::Text(v) => Some(KeyValue::Text(v.clone())),
        Value::Float(_) => None,
    }
}

/// Node and edge counts per label / relationship type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, usize>,
    pub edges: BTreeMap<String, usize>,
    pub indexes: Vec<String>,
    pub sessions_opened: usize,
    pub committed_transactions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    state: Arc<Mutex<GraphState>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        lock_state(&self.state)
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.lock();
        let mut stats = GraphStats::default();
        for key in state.nodes.keys() {
            *stats.nodes.entry(key.label.to_string()).or_default() += 1;
        }
        for key in state.edges.keys() {
            *stats.edges.entry(key.rel_type.to_string()).or_default() += 1;
        }
        stats.indexes = state.indexes.iter().map(|i| i.name.to_string()).collect();
        stats.sessions_opened = state.sessions_opened;
        stats.committed_transactions = state.committed_transactions;
        stats
    }
}

fn lock_state(state: &Mutex<GraphState>) -> MutexGuard<'_, GraphState> {
    // A panic while holding the lock leaves no half-applied transaction,
    // since ops are only applied after validation succeeds.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn open_session(&self) -> ImportResult<Box<dyn StoreSession>> {
        let mut state = self.lock();
        state.open_sessions += 1;
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

pub struct MemorySession {
    state: Arc<Mutex<GraphState>>,
    closed: bool,
}

impl MemorySession {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            lock_state(&self.state).open_sessions -= 1;
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn ensure_index(&mut self, index: &IndexSpec) -> ImportResult<()> {
        let mut state = lock_state(&self.state);
        if state.indexes.insert(index.clone()) {
            debug!("Created index {} on :{}({})", index.name, index.label, index.property);
        }
        Ok(())
    }

    async fn run_transaction(&mut self, ops: &[MergeOp]) -> ImportResult<()> {
        if self.closed {
            return Err(ImportError::connectivity("session already closed"));
        }

        let mut state = lock_state(&self.state);

        if let Some(err) = state.take_injected_failure() {
            return Err(err);
        }

        // Validate everything first so a rejected op leaves no partial commit
        ops.iter().try_for_each(MergeOp::validate)?;
        for op in ops {
            state.apply(op);
        }
        state.committed_transactions += 1;
        Ok(())
    }

    async fn close(&mut self) -> ImportResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Test Inspection
// ============================================================================

#[cfg(test)]
impl MemoryGraph {
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    pub fn fail_next_transactions(&self, count: usize, failure: InjectedFailure) {
        let mut state = self.lock();
        for _ in 0..count {
            state.pending_failures.push_back(failure);
        }
    }

    /// Node lookup with the same matching as a merge.
    pub fn node(&self, key: &NodeKey) -> Option<Props> {
        let state = self.lock();
        let key = state.resolve(key);
        state.nodes.get(&key).cloned()
    }

    pub fn edge(&self, rel_type: &'static str, from: &NodeKey, to: &NodeKey) -> Option<Props> {
        let state = self.lock();
        let key = EdgeKey {
            rel_type,
            from: state.resolve(from),
            to: state.resolve(to),
        };
        state.edges.get(&key).cloned()
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.lock().nodes.keys().filter(|k| k.label == label).count()
    }

    pub fn edge_count(&self, rel_type: &str) -> usize {
        self.lock().edges.keys().filter(|k| k.rel_type == rel_type).count()
    }

    pub fn has_index(&self, label: &str, property: &str) -> bool {
        self.lock()
            .indexes
            .iter()
            .any(|i| i.label == label && i.property == property)
    }

    /// Ordered copy of all nodes and edges, for comparing whole graphs.
    pub fn snapshot(&self) -> (BTreeMap<NodeKey, Props>, BTreeMap<EdgeKey, Props>) {
        let state = self.lock();
        (
            state.nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            state.edges.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::{merge_edge, merge_node};

    fn movie(id: i64) -> NodeKey {
        NodeKey::new("Movie", "movieId", id)
    }

    fn user(id: i64) -> NodeKey {
        NodeKey::new("User", "userId", id)
    }

    #[tokio::test]
    async fn test_merge_node_updates_in_place() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();

        session
            .run_transaction(&[merge_node(movie(1), vec![("title", "A".into())])])
            .await
            .unwrap();
        session
            .run_transaction(&[merge_node(movie(1), vec![("title", "A2".into())])])
            .await
            .unwrap();

        assert_eq!(graph.node_count("Movie"), 1);
        assert_eq!(graph.node(&movie(1)).unwrap()["title"], Value::from("A2"));
    }

    #[tokio::test]
    async fn test_merge_edge_creates_bare_endpoints_without_clobbering() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();

        session
            .run_transaction(&[merge_node(movie(1), vec![("title", "A".into())])])
            .await
            .unwrap();
        session
            .run_transaction(&[merge_edge(
                "RATED",
                user(10),
                movie(1),
                vec![("rating", 4.5.into())],
            )])
            .await
            .unwrap();

        assert_eq!(graph.node(&user(10)), Some(Props::new()));
        assert_eq!(graph.node(&movie(1)).unwrap()["title"], Value::from("A"));
        assert_eq!(graph.edge_count("RATED"), 1);
    }

    #[tokio::test]
    async fn test_rejected_transaction_commits_nothing() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();

        let ops = vec![
            merge_node(movie(1), vec![("title", "A".into())]),
            merge_node(movie(2), vec![("avg_rating", f64::INFINITY.into())]),
        ];
        let err = session.run_transaction(&ops).await.unwrap_err();

        assert!(matches!(err, ImportError::ConstraintViolation(_)));
        assert_eq!(graph.node_count("Movie"), 0);
        assert_eq!(graph.stats().committed_transactions, 0);
    }

    #[tokio::test]
    async fn test_session_released_on_close_and_drop() {
        let graph = MemoryGraph::new();

        let mut first = graph.open_session().await.unwrap();
        let second = graph.open_session().await.unwrap();
        assert_eq!(graph.open_sessions(), 2);

        first.close().await.unwrap();
        first.close().await.unwrap();
        assert_eq!(graph.open_sessions(), 1);

        drop(second);
        assert_eq!(graph.open_sessions(), 0);
        assert_eq!(graph.stats().sessions_opened, 2);
    }

    #[tokio::test]
    async fn test_ensure_index_is_idempotent() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();
        let index = IndexSpec::new("movie_id_index", "Movie", "movieId");

        session.ensure_index(&index).await.unwrap();
        session.ensure_index(&index).await.unwrap();

        assert!(graph.has_index("Movie", "movieId"));
        assert_eq!(graph.stats().indexes, vec!["movie_id_index".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let graph = MemoryGraph::new();
        graph.fail_next_transactions(1, InjectedFailure::Connectivity);
        let mut session = graph.open_session().await.unwrap();
        let ops = [merge_node(movie(1), vec![])];

        assert!(session.run_transaction(&ops).await.unwrap_err().is_transient());
        session.run_transaction(&ops).await.unwrap();
        assert_eq!(graph.node_count("Movie"), 1);
    }

    fn tag_name(name: &str) -> NodeKey {
        NodeKey::new("Tag", "name", name)
    }

    fn tag_id(id: i64) -> NodeKey {
        NodeKey::new("Tag", "tagId", id)
    }

    #[tokio::test]
    async fn test_merge_matches_node_by_attribute_like_cypher() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();

        session
            .run_transaction(&[merge_node(tag_name("pixar"), vec![("tagId", 1i64.into())])])
            .await
            .unwrap();
        session
            .run_transaction(&[
                merge_edge("HAS_TAG", movie(1), tag_id(1), vec![("relevance", 0.9.into())]),
                merge_node(tag_id(1), vec![("source", "genome".into())]),
            ])
            .await
            .unwrap();

        assert_eq!(graph.node_count("Tag"), 1);
        let tag = graph.node(&tag_name("pixar")).unwrap();
        assert_eq!(tag["source"], Value::from("genome"));
        assert!(graph.edge("HAS_TAG", &movie(1), &tag_name("pixar")).is_some());
    }

    #[tokio::test]
    async fn test_attribute_match_follows_value_changes() {
        let graph = MemoryGraph::new();
        let mut session = graph.open_session().await.unwrap();

        session
            .run_transaction(&[
                merge_node(tag_name("pixar"), vec![("tagId", 1i64.into())]),
                merge_node(tag_name("pixar"), vec![("tagId", 2i64.into())]),
                merge_node(tag_id(1), vec![]),
                merge_node(tag_id(2), vec![]),
            ])
            .await
            .unwrap();

        // tagId 1 no longer names the pixar node, so MERGE creates a new one
        assert_eq!(graph.node_count("Tag"), 2);
        assert_eq!(graph.node(&tag_id(1)), Some(Props::new()));
    }
}
