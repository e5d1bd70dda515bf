use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Key under which the root-order list appears in a children map.
pub const ROOT_KEY: &str = "root";

/// One node of a todo outline.
///
/// `parent_id` is absent for root nodes. `collapsed` only affects rendering
/// (children still exist and sync) but is persisted like any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoNode {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl TodoNode {
    /// A fresh empty node, as created by the add operation.
    pub fn new(id: impl Into<String>, parent_id: Option<String>) -> Self {
        TodoNode {
            id: id.into(),
            content: String::new(),
            note: None,
            completed: false,
            collapsed: false,
            parent_id,
        }
    }
}

/// Load payload for one todo outline: the flat node map plus the child
/// index. `children` is keyed by node id, with the root order under
/// [`ROOT_KEY`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutlineData {
    pub nodes: HashMap<String, TodoNode>,
    pub children: HashMap<String, Vec<String>>,
}

/// A node plus its current child list, as carried in the insert and update
/// buckets of a save batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWithChildren {
    pub node: TodoNode,
    pub children: Vec<String>,
}

/// The mutation buckets of one save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMutations {
    pub insert: HashMap<String, NodeWithChildren>,
    pub update: HashMap<String, NodeWithChildren>,
    pub delete: Vec<String>,
}

/// One save request: everything that changed since the last successful
/// save, plus the full current root order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBatch {
    pub root_order: Vec<String>,
    pub mutations: BatchMutations,
}

impl SaveBatch {
    pub fn is_empty(&self) -> bool {
        self.mutations.insert.is_empty()
            && self.mutations.update.is_empty()
            && self.mutations.delete.is_empty()
    }
}

/// Metadata row for one todo document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub root_nodes: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
