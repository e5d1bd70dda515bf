//! Client-side save reconciliation.
//!
//! [`build_batch`] diffs the mutation tracker against the live session to
//! produce the minimal save payload; [`Syncer`] owns the save lifecycle:
//! offline no-ops, the single in-flight save, clearing acknowledged tracker
//! entries, and the idle autosave trigger. Actual I/O lives behind
//! [`SaveTransport`]; [`HttpSaveTransport`] is the production
//! implementation.

use thiserror::Error;

use crate::db::errors::ApiError;
use crate::db::models::{NodeWithChildren, SaveBatch};
use crate::session::{Mutation, OutlineSession};
use crate::util::now_ms;

/// How long the outline has to sit untouched before an autosave fires.
pub const DEFAULT_IDLE_DELAY_MS: i64 = 1_200;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The server rejected the batch with a named integrity condition.
    #[error("save rejected: {0}")]
    Rejected(#[from] ApiError),

    /// The request never produced a server verdict (network, timeout,
    /// malformed response). Local state stays pending for the next save.
    #[error("transport error: {0}")]
    Transport(String),
}

/// What a [`Syncer::save`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    SkippedOffline,
    SkippedInFlight,
    NothingToSave,
}

/// Delivery seam for save batches. Implementations own transport, auth,
/// and endpoint details; the reconciler never does I/O itself.
pub trait SaveTransport {
    fn send(&self, todo_id: &str, batch: &SaveBatch) -> Result<(), SyncError>;
}

/// Build the save payload for everything pending in the session: full node
/// data and child lists for inserts and updates, bare ids for deletes, and
/// always the complete current root order.
pub fn build_batch(session: &OutlineSession) -> SaveBatch {
    let mut batch = SaveBatch {
        root_order: session.root_order().to_vec(),
        ..SaveBatch::default()
    };

    for (id, mutation) in &session.mutations {
        match mutation {
            Mutation::Insert | Mutation::Update => {
                // Tracker entries for live nodes always have store entries;
                // a missing one would mean the session lost sync with
                // itself, so skip rather than invent data.
                let Some(node) = session.node(id) else {
                    continue;
                };
                let entry = NodeWithChildren {
                    node: node.clone(),
                    children: session.children_of(id).to_vec(),
                };
                if *mutation == Mutation::Insert {
                    batch.mutations.insert.insert(id.clone(), entry);
                } else {
                    batch.mutations.update.insert(id.clone(), entry);
                }
            }
            Mutation::Delete => batch.mutations.delete.push(id.clone()),
        }
    }

    batch
}

/// Save lifecycle for one outline session.
pub struct Syncer<T: SaveTransport> {
    transport: T,
    online: bool,
    in_flight: bool,
    last_synced_at: Option<i64>,
    last_edit_at: Option<i64>,
    idle_delay_ms: i64,
}

impl<T: SaveTransport> Syncer<T> {
    pub fn new(transport: T) -> Self {
        Syncer {
            transport,
            online: true,
            in_flight: false,
            last_synced_at: None,
            last_edit_at: None,
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
        }
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight
    }

    pub fn last_synced_at(&self) -> Option<i64> {
        self.last_synced_at
    }

    /// Record edit activity; the idle autosave timer restarts from here.
    pub fn note_edit(&mut self, now: i64) {
        self.last_edit_at = Some(now);
    }

    /// Whether the idle autosave should fire: pending mutations, online,
    /// no save in flight, and the idle delay elapsed since the last edit.
    pub fn should_autosave(&self, session: &OutlineSession, now: i64) -> bool {
        if !session.is_dirty() || !self.online || self.in_flight {
            return false;
        }
        match self.last_edit_at {
            Some(edited) => now - edited >= self.idle_delay_ms,
            None => false,
        }
    }

    /// Send everything pending. On success the acknowledged tracker
    /// entries are cleared and the sync timestamp recorded; on failure the
    /// session is left untouched so the next save resends the same batch.
    pub fn save(&mut self, session: &mut OutlineSession) -> Result<SaveOutcome, SyncError> {
        if !self.online {
            return Ok(SaveOutcome::SkippedOffline);
        }
        if self.in_flight {
            return Ok(SaveOutcome::SkippedInFlight);
        }

        let batch = build_batch(session);
        if batch.is_empty() {
            return Ok(SaveOutcome::NothingToSave);
        }

        self.in_flight = true;
        let result = self.transport.send(session.todo_id(), &batch);
        self.in_flight = false;

        match result {
            Ok(()) => {
                let acknowledged: Vec<String> = batch
                    .mutations
                    .insert
                    .keys()
                    .chain(batch.mutations.update.keys())
                    .chain(batch.mutations.delete.iter())
                    .cloned()
                    .collect();
                session.clear_mutations_for(acknowledged.iter());
                self.last_synced_at = Some(now_ms());
                println!(
                    "[Sync] Saved {} ({} insert, {} update, {} delete)",
                    session.todo_id(),
                    batch.mutations.insert.len(),
                    batch.mutations.update.len(),
                    batch.mutations.delete.len()
                );
                Ok(SaveOutcome::Saved)
            }
            Err(e) => {
                eprintln!("[Sync] Save failed for {}: {}", session.todo_id(), e);
                Err(e)
            }
        }
    }
}

/// Production transport: PATCHes the save endpoint with the batch as JSON.
/// The authenticated user id travels in a header supplied by the caller
/// (authentication itself is outside the engine).
pub struct HttpSaveTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    user_id: String,
}

impl HttpSaveTransport {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        HttpSaveTransport {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            user_id: user_id.into(),
        }
    }
}

impl SaveTransport for HttpSaveTransport {
    fn send(&self, todo_id: &str, batch: &SaveBatch) -> Result<(), SyncError> {
        let url = format!(
            "{}/todos/{}/nodes",
            self.base_url.trim_end_matches('/'),
            todo_id
        );

        let response = self
            .client
            .patch(&url)
            .header("x-user-id", &self.user_id)
            .json(batch)
            .send()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // Structured rejections carry a machine-readable code; anything
        // else is reported as a plain transport failure.
        let body: serde_json::Value = response.json().unwrap_or_default();
        if let Some(api_error) = body
            .get("code")
            .and_then(|code| code.as_str())
            .and_then(ApiError::from_code)
        {
            return Err(SyncError::Rejected(api_error));
        }
        Err(SyncError::Transport(format!("HTTP {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{OutlineData, TodoNode, ROOT_KEY};
    use std::cell::RefCell;

    struct MockTransport {
        sent: RefCell<Vec<SaveBatch>>,
        fail_with: RefCell<Option<SyncError>>,
    }

    impl MockTransport {
        fn new() -> Self {
            MockTransport { sent: RefCell::new(Vec::new()), fail_with: RefCell::new(None) }
        }
    }

    impl SaveTransport for MockTransport {
        fn send(&self, _todo_id: &str, batch: &SaveBatch) -> Result<(), SyncError> {
            self.sent.borrow_mut().push(batch.clone());
            match self.fail_with.borrow_mut().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn session() -> OutlineSession {
        let mut data = OutlineData::default();
        for id in ["n1", "n2"] {
            data.nodes.insert(id.to_string(), TodoNode::new(id, None));
        }
        data.children
            .insert(ROOT_KEY.to_string(), vec!["n1".to_string(), "n2".to_string()]);
        OutlineSession::load("t1", data)
    }

    #[test]
    fn test_build_batch_buckets() {
        let mut session = session();
        let added = session.add_node("n1", None);
        session.update_content("n2", "changed");
        session.delete_node("n1");

        let batch = build_batch(&session);
        assert_eq!(batch.root_order, vec![added.clone(), "n2".to_string()]);
        assert!(batch.mutations.insert.contains_key(&added));
        assert!(batch.mutations.update.contains_key("n2"));
        assert_eq!(batch.mutations.delete, vec!["n1".to_string()]);
        assert_eq!(batch.mutations.update["n2"].node.content, "changed");
    }

    #[test]
    fn test_save_success_clears_tracker() {
        let mut session = session();
        session.update_content("n1", "x");

        let mut syncer = Syncer::new(MockTransport::new());
        let outcome = syncer.save(&mut session).unwrap();

        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(!session.is_dirty());
        assert!(syncer.last_synced_at().is_some());
        assert_eq!(syncer.transport.sent.borrow().len(), 1);
    }

    #[test]
    fn test_save_failure_preserves_tracker_for_retry() {
        let mut session = session();
        session.update_content("n1", "x");

        let transport = MockTransport::new();
        *transport.fail_with.borrow_mut() =
            Some(SyncError::Transport("connection reset".to_string()));
        let mut syncer = Syncer::new(transport);

        let err = syncer.save(&mut session).unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(session.is_dirty());
        assert!(syncer.last_synced_at().is_none());

        // A retry resends the same pending state.
        let outcome = syncer.save(&mut session).unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(!session.is_dirty());
        let sent = syncer.transport.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].mutations.update.keys().collect::<Vec<_>>(),
            sent[1].mutations.update.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_save_offline_is_noop() {
        let mut session = session();
        session.update_content("n1", "x");

        let mut syncer = Syncer::new(MockTransport::new());
        syncer.set_online(false);

        let outcome = syncer.save(&mut session).unwrap();
        assert_eq!(outcome, SaveOutcome::SkippedOffline);
        assert!(session.is_dirty());
        assert!(syncer.transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_save_blocked_while_in_flight() {
        let mut session = session();
        session.update_content("n1", "x");

        let mut syncer = Syncer::new(MockTransport::new());
        syncer.in_flight = true;

        let outcome = syncer.save(&mut session).unwrap();
        assert_eq!(outcome, SaveOutcome::SkippedInFlight);
        assert!(syncer.transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_pristine_session_sends_nothing() {
        let mut session = session();
        let mut syncer = Syncer::new(MockTransport::new());
        assert_eq!(syncer.save(&mut session).unwrap(), SaveOutcome::NothingToSave);
    }

    #[test]
    fn test_should_autosave_requires_idle_and_clear_path() {
        let mut session = session();
        let mut syncer = Syncer::new(MockTransport::new());

        // Pristine: nothing to autosave.
        assert!(!syncer.should_autosave(&session, 10_000));

        session.update_content("n1", "x");
        syncer.note_edit(10_000);

        // Still inside the idle window.
        assert!(!syncer.should_autosave(&session, 10_000 + DEFAULT_IDLE_DELAY_MS - 1));
        assert!(syncer.should_autosave(&session, 10_000 + DEFAULT_IDLE_DELAY_MS));

        syncer.set_online(false);
        assert!(!syncer.should_autosave(&session, 20_000));
        syncer.set_online(true);

        syncer.in_flight = true;
        assert!(!syncer.should_autosave(&session, 20_000));
    }
}
