use thiserror::Error;

/// Everything the save endpoint can reject a batch with.
///
/// The referential-integrity variants are distinct, named conditions; the
/// client surfaces them verbatim and never coerces one into another.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("todo does not exist")]
    TodoDoesNotExist,

    #[error("root node does not exist")]
    RootNodeDoesNotExist,

    #[error("node already exists")]
    NodeAlreadyExists,

    #[error("deleted node does not exist")]
    DeleteDoesNotExist,

    #[error("deleted node also appears in the update bucket")]
    DeleteUpdateConflict,

    #[error("deleted node still appears in the root order")]
    DeleteRootNodeConflict,

    #[error("inserted node references a child that does not exist")]
    InsertChildDoesNotExist,

    #[error("inserted node references a child being deleted")]
    InsertChildDeleteConflict,

    #[error("updated node does not exist")]
    UpdateDoesNotExist,

    #[error("updated node references a child that does not exist")]
    UpdateChildDoesNotExist,

    #[error("updated node references a child being deleted")]
    UpdateChildDeleteConflict,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(#[from] serde_json::Error),
}

impl ApiError {
    /// Stable machine-readable code carried in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::TodoDoesNotExist => "todo_does_not_exist",
            ApiError::RootNodeDoesNotExist => "node_root_does_not_exist",
            ApiError::NodeAlreadyExists => "node_already_exists",
            ApiError::DeleteDoesNotExist => "node_delete_does_not_exist",
            ApiError::DeleteUpdateConflict => "node_delete_update_conflict",
            ApiError::DeleteRootNodeConflict => "node_delete_root_conflict",
            ApiError::InsertChildDoesNotExist => "node_insert_child_does_not_exist",
            ApiError::InsertChildDeleteConflict => "node_insert_child_delete_conflict",
            ApiError::UpdateDoesNotExist => "node_update_does_not_exist",
            ApiError::UpdateChildDoesNotExist => "node_update_child_does_not_exist",
            ApiError::UpdateChildDeleteConflict => "node_update_child_delete_conflict",
            ApiError::Db(_) => "database_error",
            ApiError::CorruptRow(_) => "corrupt_row",
        }
    }

    /// Look an error up by its wire code. Transport uses this to rebuild
    /// the rejection condition from a response body.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "todo_does_not_exist" => Some(ApiError::TodoDoesNotExist),
            "node_root_does_not_exist" => Some(ApiError::RootNodeDoesNotExist),
            "node_already_exists" => Some(ApiError::NodeAlreadyExists),
            "node_delete_does_not_exist" => Some(ApiError::DeleteDoesNotExist),
            "node_delete_update_conflict" => Some(ApiError::DeleteUpdateConflict),
            "node_delete_root_conflict" => Some(ApiError::DeleteRootNodeConflict),
            "node_insert_child_does_not_exist" => Some(ApiError::InsertChildDoesNotExist),
            "node_insert_child_delete_conflict" => Some(ApiError::InsertChildDeleteConflict),
            "node_update_does_not_exist" => Some(ApiError::UpdateDoesNotExist),
            "node_update_child_does_not_exist" => Some(ApiError::UpdateChildDoesNotExist),
            "node_update_child_delete_conflict" => Some(ApiError::UpdateChildDeleteConflict),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        let errors = [
            ApiError::TodoDoesNotExist,
            ApiError::RootNodeDoesNotExist,
            ApiError::NodeAlreadyExists,
            ApiError::DeleteDoesNotExist,
            ApiError::DeleteUpdateConflict,
            ApiError::DeleteRootNodeConflict,
            ApiError::InsertChildDoesNotExist,
            ApiError::InsertChildDeleteConflict,
            ApiError::UpdateDoesNotExist,
            ApiError::UpdateChildDoesNotExist,
            ApiError::UpdateChildDeleteConflict,
        ];
        for err in errors {
            let code = err.code();
            let back = ApiError::from_code(code).unwrap();
            assert_eq!(back.code(), code);
        }
    }
}
