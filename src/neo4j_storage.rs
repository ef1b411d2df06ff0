//! Neo4j Batch Storage
//!
//! `GraphStore` backed by Neo4j. Each transaction groups its merges by
//! statement shape and sends every group as one UNWIND query, so a batch of
//! thousands of records costs a handful of round trips.

use crate::batch::RetryPolicy;
use crate::error::{ImportError, ImportResult};
use crate::graph_store::{GraphStore, IndexSpec, KeyValue, MergeOp, OpShape, StoreSession, Value};
use async_trait::async_trait;
use neo4rs::{query, BoltType};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

type BoltRow = HashMap<String, BoltType>;

// ============================================================================
// Helper: Convert to BoltType-compatible values
// ============================================================================

fn value_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Int(v) => (*v).into(),
        Value::Float(v) => (*v).into(),
        Value::Text(v) => v.clone().into(),
    }
}

fn key_to_bolt(key: &KeyValue) -> BoltType {
    match key {
        KeyValue::Int(v) => (*v).into(),
        KeyValue::Text(v) => v.clone().into(),
    }
}

fn attrs_to_bolt(op: &MergeOp) -> BoltType {
    let attrs: BoltRow = op
        .attrs()
        .iter()
        .map(|(name, value)| (name.to_string(), value_to_bolt(value)))
        .collect();
    attrs.into()
}

fn op_to_row(op: &MergeOp) -> BoltRow {
    let mut m: BoltRow = HashMap::new();
    match op {
        MergeOp::Node { node, .. } => {
            m.insert("key".to_string(), key_to_bolt(&node.value));
        }
        MergeOp::Edge { from, to, .. } => {
            m.insert("from".to_string(), key_to_bolt(&from.value));
            m.insert("to".to_string(), key_to_bolt(&to.value));
        }
    }
    m.insert("attrs".to_string(), attrs_to_bolt(op));
    m
}

// ============================================================================
// Cypher Templates
// ============================================================================

/// Labels, types and property names are compile-time constants from
/// `schema`; only row values travel as parameters.
fn merge_cypher(shape: &OpShape) -> String {
    match shape {
        OpShape::Node { label, property } => format!(
            "UNWIND $rows AS row
             MERGE (n:{label} {{{property}: row.key}})
             SET n += row.attrs"
        ),
        OpShape::Edge {
            rel_type,
            from: (from_label, from_property),
            to: (to_label, to_property),
        } => format!(
            "UNWIND $rows AS row
             MERGE (a:{from_label} {{{from_property}: row.from}})
             MERGE (b:{to_label} {{{to_property}: row.to}})
             MERGE (a)-[r:{rel_type}]->(b)
             SET r += row.attrs"
        ),
    }
}

fn index_cypher(index: &IndexSpec) -> String {
    format!(
        "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
        index.name, index.label, index.property
    )
}

/// Split ops into per-shape groups, keeping first-seen shape order and the
/// original order inside each group. Node attribute writes and edge writes
/// never touch the same properties, so regrouping leaves the end state
/// unchanged.
fn group_by_shape(ops: &[MergeOp]) -> Vec<(OpShape, Vec<BoltRow>)> {
    let mut groups: Vec<(OpShape, Vec<BoltRow>)> = Vec::new();
    let mut positions: HashMap<OpShape, usize> = HashMap::new();

    for op in ops {
        let shape = op.shape();
        let idx = *positions.entry(shape).or_insert_with(|| {
            groups.push((shape, Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push(op_to_row(op));
    }

    groups
}

/// Status-code prefix of retryable server failures. neo4rs reports server
/// failures as unexpected messages that include the code.
const TRANSIENT_STATUS: &str = "Neo.TransientError.";

/// Connection-level failures (pool timeouts included) and transient server
/// statuses can be retried. Anything else is the server rejecting the
/// statement or its parameters.
fn classify(err: neo4rs::Error) -> ImportError {
    match &err {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            ImportError::connectivity(err.to_string())
        }
        neo4rs::Error::UnexpectedMessage(detail) if detail.contains(TRANSIENT_STATUS) => {
            ImportError::connectivity(err.to_string())
        }
        _ => ImportError::constraint(err.to_string()),
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct Neo4jStore {
    graph: neo4rs::Graph,
}

impl Neo4jStore {
    /// Connect to Neo4j, backing off between failed attempts.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        retry: &RetryPolicy,
    ) -> anyhow::Result<Self> {
        let max_attempts = retry.max_attempts();
        let mut attempt = 1;
        loop {
            info!("🔄 Connecting to Neo4j at {} (attempt {}/{})", uri, attempt, max_attempts);

            match neo4rs::Graph::new(uri, user, password).await {
                Ok(graph) => {
                    info!("✅ Connected to Neo4j");
                    return Ok(Self { graph });
                }
                Err(e) if attempt < max_attempts => {
                    let wait = retry.delay_for(attempt);
                    warn!("⚠️  Neo4j unavailable: {}. Retrying in {:?}...", e, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("❌ Giving up on Neo4j after {} attempt(s): {}", attempt, e);
                    return Err(anyhow::anyhow!(
                        "Neo4j connection failed after {} attempt(s): {}",
                        attempt,
                        e
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn open_session(&self) -> ImportResult<Box<dyn StoreSession>> {
        // Graph is a handle onto the shared connection pool
        Ok(Box::new(Neo4jSession {
            graph: Some(self.graph.clone()),
        }))
    }
}

pub struct Neo4jSession {
    graph: Option<neo4rs::Graph>,
}

impl Neo4jSession {
    fn graph(&self) -> ImportResult<&neo4rs::Graph> {
        self.graph
            .as_ref()
            .ok_or_else(|| ImportError::connectivity("Neo4j session already closed"))
    }
}

async fn execute_groups(txn: &mut neo4rs::Txn, ops: &[MergeOp]) -> ImportResult<()> {
    for (shape, rows) in group_by_shape(ops) {
        let count = rows.len();
        let q = query(&merge_cypher(&shape)).param("rows", rows);
        txn.run(q).await.map_err(classify)?;
        debug!("   Merged {} rows for {:?}", count, shape);
    }
    Ok(())
}

#[async_trait]
impl StoreSession for Neo4jSession {
    async fn ensure_index(&mut self, index: &IndexSpec) -> ImportResult<()> {
        self.graph()?
            .run(query(&index_cypher(index)))
            .await
            .map_err(classify)?;
        info!("   Ensured index {} on :{}({})", index.name, index.label, index.property);
        Ok(())
    }

    async fn run_transaction(&mut self, ops: &[MergeOp]) -> ImportResult<()> {
        let mut txn = self.graph()?.start_txn().await.map_err(classify)?;

        match execute_groups(&mut txn, ops).await {
            Ok(()) => {
                txn.commit().await.map_err(classify)?;
                Ok(())
            }
            Err(e) => {
                warn!("❌ Error during batch merge, rolling back: {}", e);
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("Failed to rollback transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> ImportResult<()> {
        self.graph = None;
        Ok(())
    }
}
