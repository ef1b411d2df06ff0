//! Graph Store Capability
//!
//! The minimal surface the import procedures need from a property-graph
//! store: index creation, keyed node/edge merges and atomic transactions.
//! `Neo4jStore` and `MemoryGraph` both implement it.

use crate::error::{ImportError, ImportResult};
use async_trait::async_trait;

// ============================================================================
// Values
// ============================================================================

/// Attribute value written onto a node or relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Value of a node's identity property. Floats are never identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

/// Ordered attribute list; later entries for the same name win.
pub type Attrs = Vec<(&'static str, Value)>;

// ============================================================================
// Identities and Operations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub property: &'static str,
}

impl IndexSpec {
    pub const fn new(name: &'static str, label: &'static str, property: &'static str) -> Self {
        Self {
            name,
            label,
            property,
        }
    }
}

/// A node addressed by its declared key property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub label: &'static str,
    pub property: &'static str,
    pub value: KeyValue,
}

impl NodeKey {
    pub fn new(label: &'static str, property: &'static str, value: impl Into<KeyValue>) -> Self {
        Self {
            label,
            property,
            value: value.into(),
        }
    }
}

/// A single idempotent create-or-update.
///
/// Edge merges create missing endpoints with only their key populated and
/// never touch endpoint attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOp {
    Node {
        node: NodeKey,
        attrs: Attrs,
    },
    Edge {
        rel_type: &'static str,
        from: NodeKey,
        to: NodeKey,
        attrs: Attrs,
    },
}

pub fn merge_node(node: NodeKey, attrs: Attrs) -> MergeOp {
    MergeOp::Node { node, attrs }
}

pub fn merge_edge(rel_type: &'static str, from: NodeKey, to: NodeKey, attrs: Attrs) -> MergeOp {
    MergeOp::Edge {
        rel_type,
        from,
        to,
        attrs,
    }
}

/// Statement shape of a merge: ops sharing a shape share one parametrized
/// statement and differ only in their row values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpShape {
    Node {
        label: &'static str,
        property: &'static str,
    },
    Edge {
        rel_type: &'static str,
        from: (&'static str, &'static str),
        to: (&'static str, &'static str),
    },
}

impl MergeOp {
    pub fn shape(&self) -> OpShape {
        match self {
            MergeOp::Node { node, .. } => OpShape::Node {
                label: node.label,
                property: node.property,
            },
            MergeOp::Edge {
                rel_type, from, to, ..
            } => OpShape::Edge {
                rel_type: *rel_type,
                from: (from.label, from.property),
                to: (to.label, to.property),
            },
        }
    }

    pub fn attrs(&self) -> &Attrs {
        match self {
            MergeOp::Node { attrs, .. } | MergeOp::Edge { attrs, .. } => attrs,
        }
    }

    /// Reject values no store would accept: blank text keys and non-finite
    /// floats.
    pub fn validate(&self) -> ImportResult<()> {
        match self {
            MergeOp::Node { node, .. } => validate_key(node)?,
            MergeOp::Edge { from, to, .. } => {
                validate_key(from)?;
                validate_key(to)?;
            }
        }

        for (name, value) in self.attrs() {
            if let Value::Float(f) = value {
                if !f.is_finite() {
                    return Err(ImportError::constraint(format!(
                        "attribute `{}` is not a finite number ({})",
                        name, f
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_key(key: &NodeKey) -> ImportResult<()> {
    match &key.value {
        KeyValue::Text(s) if s.trim().is_empty() => Err(ImportError::constraint(format!(
            "{}.{} key is empty",
            key.label, key.property
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Store Traits
// ============================================================================

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Acquire a session. The caller must `close` it on every exit path.
    async fn open_session(&self) -> ImportResult<Box<dyn StoreSession>>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Create the index if it does not exist yet.
    async fn ensure_index(&mut self, index: &IndexSpec) -> ImportResult<()>;

    /// Apply every op or none of them.
    async fn run_transaction(&mut self, ops: &[MergeOp]) -> ImportResult<()>;

    async fn close(&mut self) -> ImportResult<()>;
}
