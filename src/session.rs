//! Per-document editing session: node store, child index, and mutation
//! tracker. One session owns all optimistic state for one open outline and
//! is discarded wholesale when the outline closes; reopening loads fresh
//! from the server.

use std::collections::HashMap;

use crate::db::models::{OutlineData, TodoNode, ROOT_KEY};

/// The single most significant pending change for one node since the last
/// successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Insert,
    Update,
    Delete,
}

/// In-memory state of one open outline.
///
/// All edit operations take `&mut self` and run synchronously on the single
/// owning thread; there is no interior locking and no copy-on-write.
pub struct OutlineSession {
    todo_id: String,
    pub(crate) nodes: HashMap<String, TodoNode>,
    pub(crate) children: HashMap<String, Vec<String>>,
    pub(crate) root: Vec<String>,
    pub(crate) mutations: HashMap<String, Mutation>,
}

impl OutlineSession {
    /// Seed a session from a server load. The mutation tracker starts
    /// empty: the loaded state is the baseline.
    pub fn load(todo_id: impl Into<String>, data: OutlineData) -> Self {
        let mut nodes = data.nodes;
        let mut children = data.children;
        let root = children.remove(ROOT_KEY).unwrap_or_default();

        // Every node gets a child list, and parent back-references are
        // re-derived from the lists so the two can never disagree.
        for node in nodes.values_mut() {
            node.parent_id = None;
        }
        for id in nodes.keys().cloned().collect::<Vec<_>>() {
            children.entry(id).or_default();
        }
        let memberships: Vec<(String, String)> = children
            .iter()
            .flat_map(|(parent, kids)| kids.iter().map(|kid| (kid.clone(), parent.clone())))
            .collect();
        for (kid, parent) in memberships {
            if let Some(node) = nodes.get_mut(&kid) {
                node.parent_id = Some(parent);
            }
        }

        OutlineSession {
            todo_id: todo_id.into(),
            nodes,
            children,
            root,
            mutations: HashMap::new(),
        }
    }

    /// An empty session (no nodes, nothing pending).
    pub fn new(todo_id: impl Into<String>) -> Self {
        Self::load(todo_id, OutlineData::default())
    }

    pub fn todo_id(&self) -> &str {
        &self.todo_id
    }

    pub fn node(&self, id: &str) -> Option<&TodoNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Child ids of a node, in order. Empty for unknown ids.
    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The ordered top-level node ids.
    pub fn root_order(&self) -> &[String] {
        &self.root
    }

    pub fn mutation(&self, id: &str) -> Option<Mutation> {
        self.mutations.get(id).copied()
    }

    /// Whether any mutation is pending since the last successful save.
    pub fn is_dirty(&self) -> bool {
        !self.mutations.is_empty()
    }

    /// Mark a node as mutated. An existing `insert` mark survives any
    /// number of later edits; it never downgrades to `update`.
    pub(crate) fn mark_updated(&mut self, id: &str) {
        self.mutations.entry(id.to_string()).or_insert(Mutation::Update);
    }

    pub(crate) fn mark_inserted(&mut self, id: &str) {
        self.mutations.insert(id.to_string(), Mutation::Insert);
    }

    /// Record a deletion. A node that was never persisted (pending
    /// `insert`) just loses its record; the server must not be asked to
    /// delete an id it has never seen.
    pub(crate) fn mark_deleted(&mut self, id: &str) {
        match self.mutations.get(id) {
            Some(Mutation::Insert) => {
                self.mutations.remove(id);
            }
            _ => {
                self.mutations.insert(id.to_string(), Mutation::Delete);
            }
        }
    }

    /// Drop the given tracker entries after a save was acknowledged. Only
    /// the ids the acknowledged batch contained are cleared, so edits made
    /// while the save was in flight stay pending.
    pub(crate) fn clear_mutations_for<'a, I: IntoIterator<Item = &'a String>>(&mut self, ids: I) {
        for id in ids {
            self.mutations.remove(id);
        }
    }
}
