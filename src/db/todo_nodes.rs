//! Server-side validation and transactional apply of outline save batches.
//!
//! A batch is checked against the persisted snapshot of the todo before any
//! row is touched: every rejection names the exact referential-integrity
//! condition, and a rejected batch leaves the store untouched. Apply order
//! is deletes, then updates, then inserts, then the new root order, all in
//! one transaction.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension};

use super::errors::ApiError;
use super::models::{OutlineData, SaveBatch, TodoNode, ROOT_KEY};
use super::schema::Database;
use crate::util::now_ms;

/// Load one outline: the flat node map plus the child index, with each
/// node's `parent_id` derived from the stored child lists.
pub fn get_todo_nodes(db: &Database, todo_id: &str, user_id: &str) -> Result<OutlineData, ApiError> {
    let conn = db.lock();

    let root_json: String = conn
        .query_row(
            "SELECT root_nodes FROM todos WHERE id = ?1 AND user_id = ?2",
            params![todo_id, user_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ApiError::TodoDoesNotExist)?;
    let root: Vec<String> = serde_json::from_str(&root_json)?;

    let mut stmt = conn.prepare(
        "SELECT id, content, note, completed, collapsed, children
         FROM todo_nodes WHERE todo_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![todo_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut data = OutlineData::default();
    for (id, content, note, completed, collapsed, children_json) in rows {
        let children: Vec<String> = serde_json::from_str(&children_json)?;
        data.nodes.insert(
            id.clone(),
            TodoNode { id: id.clone(), content, note, completed, collapsed, parent_id: None },
        );
        data.children.insert(id, children);
    }

    // Back-references come from the child lists, not from a stored column.
    let memberships: Vec<(String, String)> = data
        .children
        .iter()
        .flat_map(|(parent, kids)| kids.iter().map(|kid| (kid.clone(), parent.clone())))
        .collect();
    for (kid, parent) in memberships {
        if let Some(node) = data.nodes.get_mut(&kid) {
            node.parent_id = Some(parent);
        }
    }

    data.children.insert(ROOT_KEY.to_string(), root);

    Ok(data)
}

/// Validate and apply one save batch, all-or-nothing.
pub fn update_todo_nodes(
    db: &Database,
    todo_id: &str,
    user_id: &str,
    batch: &SaveBatch,
) -> Result<(), ApiError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;

    let owned: Option<String> = tx
        .query_row(
            "SELECT id FROM todos WHERE id = ?1 AND user_id = ?2",
            params![todo_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    if owned.is_none() {
        return Err(ApiError::TodoDoesNotExist);
    }

    let persisted: HashSet<String> = {
        let mut stmt = tx.prepare("SELECT id FROM todo_nodes WHERE todo_id = ?1")?;
        let ids = stmt
            .query_map(params![todo_id], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        ids
    };

    validate_mutations(&persisted, batch)?;

    for id in &batch.mutations.delete {
        tx.execute(
            "DELETE FROM todo_nodes WHERE id = ?1 AND todo_id = ?2",
            params![id, todo_id],
        )?;
    }

    for (id, update) in &batch.mutations.update {
        let children_json = serde_json::to_string(&update.children)?;
        tx.execute(
            "UPDATE todo_nodes
             SET content = ?3, note = ?4, completed = ?5, collapsed = ?6, children = ?7
             WHERE id = ?1 AND todo_id = ?2",
            params![
                id,
                todo_id,
                update.node.content,
                update.node.note,
                update.node.completed,
                update.node.collapsed,
                children_json
            ],
        )?;
    }

    for (id, insert) in &batch.mutations.insert {
        let children_json = serde_json::to_string(&insert.children)?;
        tx.execute(
            "INSERT INTO todo_nodes (id, todo_id, content, note, completed, collapsed, children)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                todo_id,
                insert.node.content,
                insert.node.note,
                insert.node.completed,
                insert.node.collapsed,
                children_json
            ],
        )?;
    }

    let root_json = serde_json::to_string(&batch.root_order)?;
    tx.execute(
        "UPDATE todos SET root_nodes = ?2, updated_at = ?3 WHERE id = ?1",
        params![todo_id, root_json, now_ms()],
    )?;

    tx.commit()?;
    Ok(())
}

/// Referential-integrity checks, in the same order the original ran them:
/// root order, then deletes, then inserts, then updates.
fn validate_mutations(persisted: &HashSet<String>, batch: &SaveBatch) -> Result<(), ApiError> {
    let inserts = &batch.mutations.insert;
    let updates = &batch.mutations.update;
    let deletes = &batch.mutations.delete;

    for root_id in &batch.root_order {
        if !persisted.contains(root_id) && !inserts.contains_key(root_id) {
            return Err(ApiError::RootNodeDoesNotExist);
        }
    }

    for deleted_id in deletes {
        if !persisted.contains(deleted_id) {
            return Err(ApiError::DeleteDoesNotExist);
        } else if updates.contains_key(deleted_id) {
            return Err(ApiError::DeleteUpdateConflict);
        } else if batch.root_order.contains(deleted_id) {
            return Err(ApiError::DeleteRootNodeConflict);
        }
    }

    for (inserted_id, inserted) in inserts {
        if persisted.contains(inserted_id) {
            return Err(ApiError::NodeAlreadyExists);
        }
        for child_id in &inserted.children {
            if !persisted.contains(child_id) && !inserts.contains_key(child_id) {
                return Err(ApiError::InsertChildDoesNotExist);
            } else if deletes.contains(child_id) {
                return Err(ApiError::InsertChildDeleteConflict);
            }
        }
    }

    for (updated_id, updated) in updates {
        if !persisted.contains(updated_id) {
            return Err(ApiError::UpdateDoesNotExist);
        }
        for child_id in &updated.children {
            if !persisted.contains(child_id) && !inserts.contains_key(child_id) {
                return Err(ApiError::UpdateChildDoesNotExist);
            } else if deletes.contains(child_id) {
                return Err(ApiError::UpdateChildDeleteConflict);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NodeWithChildren;

    fn setup() -> (Database, String, String) {
        let db = Database::in_memory().unwrap();
        let todo = db.create_todo("u1", "Outline").unwrap();
        let seed_id = todo.root_nodes[0].clone();
        (db, todo.id, seed_id)
    }

    fn node_with_children(id: &str, content: &str, children: Vec<&str>) -> NodeWithChildren {
        let mut node = TodoNode::new(id, None);
        node.content = content.to_string();
        NodeWithChildren {
            node,
            children: children.into_iter().map(String::from).collect(),
        }
    }

    fn insert_batch(root_order: Vec<&str>, inserts: Vec<NodeWithChildren>) -> SaveBatch {
        let mut batch = SaveBatch::default();
        batch.root_order = root_order.into_iter().map(String::from).collect();
        for insert in inserts {
            batch.mutations.insert.insert(insert.node.id.clone(), insert);
        }
        batch
    }

    #[test]
    fn test_apply_insert_and_reload() {
        let (db, todo_id, seed) = setup();

        let batch = insert_batch(
            vec![&seed, "n2"],
            vec![node_with_children("n2", "second", vec!["n3"]),
                 node_with_children("n3", "child of second", vec![])],
        );
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert_eq!(data.children[ROOT_KEY], vec![seed.clone(), "n2".to_string()]);
        assert_eq!(data.children["n2"], vec!["n3".to_string()]);
        assert_eq!(data.nodes["n3"].parent_id.as_deref(), Some("n2"));
        assert!(data.nodes[&seed].parent_id.is_none());
    }

    #[test]
    fn test_update_node_fields() {
        let (db, todo_id, seed) = setup();

        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        let mut update = node_with_children(&seed, "buy milk", vec![]);
        update.node.completed = true;
        update.node.note = Some("2% if they have it".to_string());
        batch.mutations.update.insert(seed.clone(), update);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert_eq!(data.nodes[&seed].content, "buy milk");
        assert!(data.nodes[&seed].completed);
        assert_eq!(data.nodes[&seed].note.as_deref(), Some("2% if they have it"));
    }

    #[test]
    fn test_rejects_unknown_todo_and_wrong_user() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed], vec![]);

        let err = update_todo_nodes(&db, "nope", "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::TodoDoesNotExist));

        let err = update_todo_nodes(&db, &todo_id, "u2", &batch).unwrap_err();
        assert!(matches!(err, ApiError::TodoDoesNotExist));
    }

    #[test]
    fn test_rejects_missing_root_node() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "ghost"], vec![]);
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::RootNodeDoesNotExist));
    }

    #[test]
    fn test_rejects_delete_update_conflict() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "n5"], vec![node_with_children("n5", "", vec![])]);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        // Same id in both the delete list and the update bucket.
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.delete.push("n5".to_string());
        batch.mutations.update.insert("n5".to_string(), node_with_children("n5", "x", vec![]));
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::DeleteUpdateConflict));

        // Nothing was applied.
        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert!(data.nodes.contains_key("n5"));
        assert_eq!(data.nodes["n5"].content, "");
    }

    #[test]
    fn test_rejects_delete_of_unknown_node() {
        let (db, todo_id, seed) = setup();
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.delete.push("never-existed".to_string());
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::DeleteDoesNotExist));
    }

    #[test]
    fn test_rejects_delete_still_in_root_order() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "n5"], vec![node_with_children("n5", "", vec![])]);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone(), "n5".to_string()];
        batch.mutations.delete.push("n5".to_string());
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::DeleteRootNodeConflict));
    }

    #[test]
    fn test_rejects_insert_with_missing_child() {
        let (db, todo_id, seed) = setup();
        // n9's children reference n10, which is neither persisted nor inserted.
        let batch = insert_batch(
            vec![&seed, "n9"],
            vec![node_with_children("n9", "", vec!["n10"])],
        );
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::InsertChildDoesNotExist));
        assert!(!get_todo_nodes(&db, &todo_id, "u1").unwrap().nodes.contains_key("n9"));
    }

    #[test]
    fn test_rejects_insert_of_deleted_child() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "n5"], vec![node_with_children("n5", "", vec![])]);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone(), "n6".to_string()];
        batch.mutations.delete.push("n5".to_string());
        batch.mutations.insert.insert(
            "n6".to_string(),
            node_with_children("n6", "", vec!["n5"]),
        );
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::InsertChildDeleteConflict));
    }

    #[test]
    fn test_rejects_duplicate_insert() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed], vec![node_with_children(&seed, "", vec![])]);
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::NodeAlreadyExists));
    }

    #[test]
    fn test_rejects_update_of_unknown_node() {
        let (db, todo_id, seed) = setup();
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.update.insert("ghost".to_string(), node_with_children("ghost", "", vec![]));
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::UpdateDoesNotExist));
    }

    #[test]
    fn test_rejects_update_with_missing_child() {
        let (db, todo_id, seed) = setup();
        // The seed node's new child list references a node that is neither
        // persisted nor in the insert bucket.
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.update.insert(
            seed.clone(),
            node_with_children(&seed, "", vec!["ghost"]),
        );
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::UpdateChildDoesNotExist));
    }

    #[test]
    fn test_rejects_update_keeping_deleted_child() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "n5"], vec![node_with_children("n5", "", vec![])]);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        // n5 is being deleted but the seed's updated child list still
        // claims it.
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.delete.push("n5".to_string());
        batch.mutations.update.insert(
            seed.clone(),
            node_with_children(&seed, "", vec!["n5"]),
        );
        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::UpdateChildDeleteConflict));

        // Nothing was applied, n5 survives.
        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert!(data.nodes.contains_key("n5"));
    }

    #[test]
    fn test_rejected_batch_applies_nothing() {
        let (db, todo_id, seed) = setup();
        // A valid insert rides along with an invalid delete; the whole
        // batch must be rolled back, including the valid part.
        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone(), "n6".to_string()];
        batch.mutations.insert.insert("n6".to_string(), node_with_children("n6", "", vec![]));
        batch.mutations.delete.push("ghost".to_string());

        let err = update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap_err();
        assert!(matches!(err, ApiError::DeleteDoesNotExist));

        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert!(!data.nodes.contains_key("n6"));
        assert_eq!(data.children[ROOT_KEY], vec![seed]);
    }

    #[test]
    fn test_delete_applies() {
        let (db, todo_id, seed) = setup();
        let batch = insert_batch(vec![&seed, "n5"], vec![node_with_children("n5", "", vec![])]);
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let mut batch = SaveBatch::default();
        batch.root_order = vec![seed.clone()];
        batch.mutations.delete.push("n5".to_string());
        update_todo_nodes(&db, &todo_id, "u1", &batch).unwrap();

        let data = get_todo_nodes(&db, &todo_id, "u1").unwrap();
        assert!(!data.nodes.contains_key("n5"));
        assert_eq!(data.children[ROOT_KEY], vec![seed]);
    }
}
