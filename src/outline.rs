//! Tree edit operations over an [`OutlineSession`].
//!
//! Every operation is a synchronous, in-place rewrite of the node store,
//! the child index, and the mutation tracker; none performs I/O. Client
//! precondition violations (nesting with no preceding sibling, moving past
//! a list boundary, unknown ids) are no-ops rather than errors.
//!
//! Any node whose child list changes is marked `update` so the next save
//! batch carries the new list; the root order needs no mark because every
//! batch includes it in full.

use crate::db::models::TodoNode;
use crate::session::OutlineSession;

/// Vertical direction for sibling moves and caret navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One renderable row: a node id and its depth in the expanded tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineRow {
    pub id: String,
    pub depth: usize,
}

impl OutlineSession {
    fn list(&self, parent_id: Option<&str>) -> &[String] {
        match parent_id {
            Some(parent) => self.children_of(parent),
            None => &self.root,
        }
    }

    fn list_mut(&mut self, parent_id: Option<&str>) -> &mut Vec<String> {
        match parent_id {
            Some(parent) => self.children.entry(parent.to_string()).or_default(),
            None => &mut self.root,
        }
    }

    /// Create a new empty node as the sibling immediately after `after_id`
    /// within `parent_id`'s child list (the root order when absent), mark
    /// it `insert`, and return its id so the caller can focus it.
    pub fn add_node(&mut self, after_id: &str, parent_id: Option<&str>) -> String {
        let new_id = uuid::Uuid::new_v4().to_string();
        let node = TodoNode::new(new_id.clone(), parent_id.map(String::from));

        self.nodes.insert(new_id.clone(), node);
        self.children.insert(new_id.clone(), Vec::new());

        let list = self.list_mut(parent_id);
        let index = list
            .iter()
            .position(|id| id == after_id)
            .map(|i| i + 1)
            .unwrap_or(0);
        list.insert(index, new_id.clone());

        self.mark_inserted(&new_id);
        if let Some(parent) = parent_id {
            // The parent's child list changed.
            self.mark_updated(parent);
        }

        new_id
    }

    /// Delete a node and its whole subtree, excising every removed id from
    /// the store and child index atomically with the `delete` marks.
    pub fn delete_node(&mut self, id: &str) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let parent_id = node.parent_id.clone();

        let list = self.list_mut(parent_id.as_deref());
        if let Some(index) = list.iter().position(|entry| entry == id) {
            list.remove(index);
        }

        // Depth-first collection of the subtree rooted at `id`.
        let mut doomed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            stack.extend(self.children_of(&current).iter().cloned());
            doomed.push(current);
        }

        for doomed_id in doomed {
            self.nodes.remove(&doomed_id);
            self.children.remove(&doomed_id);
            self.mark_deleted(&doomed_id);
        }

        if let Some(parent) = parent_id {
            self.mark_updated(&parent);
        }
    }

    /// Replace a node's content. Line breaks never live inside a node, so
    /// any that arrive (e.g. from a paste) collapse to spaces.
    pub fn update_content(&mut self, id: &str, content: &str) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.content = content.replace('\n', " ");
        self.mark_updated(id);
    }

    pub fn update_note(&mut self, id: &str, note: Option<&str>) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.note = note.map(String::from);
        self.mark_updated(id);
    }

    pub fn toggle_completed(&mut self, id: &str) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.completed = !node.completed;
        self.mark_updated(id);
    }

    /// Collapsed is persisted state (children still sync), so this marks
    /// `update` like any other field flip.
    pub fn toggle_collapsed(&mut self, id: &str) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.collapsed = !node.collapsed;
        self.mark_updated(id);
    }

    /// Indent: the node becomes the last child of its immediately
    /// preceding sibling. No-op for a first child (nothing to nest under).
    pub fn nest_node(&mut self, id: &str) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let parent_id = node.parent_id.clone();

        let list = self.list(parent_id.as_deref());
        let Some(index) = list.iter().position(|entry| entry == id) else {
            return;
        };
        if index == 0 {
            return;
        }
        let sibling_id = list[index - 1].clone();

        self.list_mut(parent_id.as_deref()).remove(index);
        self.children
            .entry(sibling_id.clone())
            .or_default()
            .push(id.to_string());
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = Some(sibling_id.clone());
        }

        self.mark_updated(id);
        self.mark_updated(&sibling_id);
        if let Some(parent) = parent_id {
            self.mark_updated(&parent);
        }
    }

    /// Outdent: the node is re-inserted immediately after its parent in
    /// the parent's own list (the root order when the parent is a root
    /// node). No-op for root nodes.
    pub fn unnest_node(&mut self, id: &str) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(parent_id) = node.parent_id.clone() else {
            return;
        };
        let grandparent_id = self
            .nodes
            .get(&parent_id)
            .and_then(|parent| parent.parent_id.clone());

        let siblings = self.list_mut(Some(&parent_id));
        let Some(index) = siblings.iter().position(|entry| entry == id) else {
            return;
        };
        siblings.remove(index);

        let target = self.list_mut(grandparent_id.as_deref());
        let insert_at = target
            .iter()
            .position(|entry| entry == &parent_id)
            .map(|i| i + 1)
            .unwrap_or(target.len());
        target.insert(insert_at, id.to_string());

        if let Some(node) = self.nodes.get_mut(id) {
            node.parent_id = grandparent_id.clone();
        }

        self.mark_updated(id);
        self.mark_updated(&parent_id);
        if let Some(grandparent) = grandparent_id {
            self.mark_updated(&grandparent);
        }
    }

    /// Swap a node with its previous (`Up`) or next (`Down`) sibling
    /// within the same child list. No-op at either end of the list.
    pub fn move_node(&mut self, id: &str, direction: Direction) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let parent_id = node.parent_id.clone();

        let list = self.list_mut(parent_id.as_deref());
        let Some(index) = list.iter().position(|entry| entry == id) else {
            return;
        };
        let target = match direction {
            Direction::Up => {
                if index == 0 {
                    return;
                }
                index - 1
            }
            Direction::Down => {
                if index + 1 >= list.len() {
                    return;
                }
                index + 1
            }
        };
        list.swap(index, target);

        self.mark_updated(id);
        if let Some(parent) = parent_id {
            self.mark_updated(&parent);
        }
    }

    /// Depth of a node: 0 for root nodes, one more per ancestor.
    pub fn depth(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            match &node.parent_id {
                Some(parent) => {
                    depth += 1;
                    current = self.nodes.get(parent);
                }
                None => break,
            }
        }
        depth
    }

    /// Pre-order flattening of the rendered tree. Children of collapsed
    /// nodes are skipped entirely; the collapsed node itself is included.
    pub fn visible_rows(&self) -> Vec<OutlineRow> {
        let mut rows = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(String, usize)> = self
            .root
            .iter()
            .rev()
            .map(|id| (id.clone(), 0))
            .collect();

        while let Some((id, depth)) = stack.pop() {
            let collapsed = self.nodes.get(&id).map(|node| node.collapsed).unwrap_or(false);
            if !collapsed {
                for child in self.children_of(&id).iter().rev() {
                    stack.push((child.clone(), depth + 1));
                }
            }
            rows.push(OutlineRow { id, depth });
        }

        rows
    }

    /// The node rendered immediately before (`Up`) or after (`Down`) the
    /// given one. This is the focus target for arrow-key navigation and
    /// for refocusing after a delete.
    pub fn closest_node_id(&self, id: &str, direction: Direction) -> Option<String> {
        let rows = self.visible_rows();
        let index = rows.iter().position(|row| row.id == id)?;
        match direction {
            Direction::Up => index.checked_sub(1).map(|i| rows[i].id.clone()),
            Direction::Down => rows.get(index + 1).map(|row| row.id.clone()),
        }
    }

    /// Structural self-check: every listed id exists, every node appears
    /// in exactly one list exactly once, parent pointers agree with list
    /// membership, and the whole forest is reachable from the root order.
    pub fn check_forest(&self) -> Result<(), String> {
        use std::collections::HashMap;

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut membership: Vec<(Option<&str>, &str)> = Vec::new();
        for id in &self.root {
            membership.push((None, id));
        }
        for (parent, kids) in &self.children {
            for kid in kids {
                membership.push((Some(parent.as_str()), kid));
            }
        }

        for (parent, id) in &membership {
            let Some(node) = self.nodes.get(*id) else {
                return Err(format!("listed id {id} is not in the node store"));
            };
            if node.parent_id.as_deref() != *parent {
                return Err(format!(
                    "node {id} has parent {:?} but is listed under {:?}",
                    node.parent_id, parent
                ));
            }
            *seen.entry(id).or_insert(0) += 1;
        }

        for id in self.nodes.keys() {
            match seen.get(id.as_str()) {
                Some(1) => {}
                Some(n) => return Err(format!("node {id} appears in {n} lists")),
                None => return Err(format!("node {id} appears in no list")),
            }
        }
        if seen.len() != self.nodes.len() {
            return Err("child lists reference ids outside the node store".to_string());
        }

        // A disconnected cycle would pass the membership counts; demand
        // full reachability from the root order.
        let mut reached = 0usize;
        let mut stack: Vec<&str> = self.root.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            reached += 1;
            stack.extend(self.children_of(id).iter().map(String::as_str));
        }
        if reached != self.nodes.len() {
            return Err(format!(
                "{} nodes stored but only {reached} reachable from the root order",
                self.nodes.len()
            ));
        }

        Ok(())
    }
}
