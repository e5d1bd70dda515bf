pub mod errors;
pub mod models;
pub mod schema;
pub mod todo_nodes;

pub use errors::ApiError;
pub use models::{
    BatchMutations, NodeWithChildren, OutlineData, SaveBatch, Todo, TodoNode, ROOT_KEY,
};
pub use schema::Database;
pub use todo_nodes::{get_todo_nodes, update_todo_nodes};
