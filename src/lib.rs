//! Rootline: a todo outline engine.
//!
//! The outline is a forest of text nodes edited in memory through
//! [`session::OutlineSession`] (structure ops in [`outline`], caret
//! navigation math in [`caret`]). Edits accumulate in a mutation tracker
//! and [`sync`] ships them to the server as validated batches; [`db`]
//! holds the SQLite store and the server-side batch validator/applier.

pub mod caret;
pub mod db;
pub mod outline;
pub mod session;
pub mod sync;
pub mod util;
