//! Wire DTOs shared by every resource.
//!
//! # Design
//! Items themselves are caller-defined (`T: Serialize + DeserializeOwned`);
//! only the envelopes the backend fixes are modelled here. Patches and bulk
//! filters are open JSON maps since the operator syntax belongs to the backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::MatchExpression;

/// Update document, e.g. `{"$set": {"done": true}}`.
pub type Patch = Map<String, Value>;

/// Identifier assigned by the backend on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedId {
    #[serde(rename = "_id")]
    pub id: String,
}

/// One entry of an update-bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdate {
    pub filter: MatchExpression,
    pub update: Patch,
}

/// Lifecycle states an item can be moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemState {
    Trash,
}

/// Body of `POST <resource>/<id>/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub state_to: ItemState,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inserted_id_uses_underscore_id() {
        let id: InsertedId = serde_json::from_value(json!({"_id": "abc"})).unwrap();
        assert_eq!(id.id, "abc");
    }

    #[test]
    fn trash_transition_serializes_to_wire_shape() {
        let body = serde_json::to_value(StateTransition {
            state_to: ItemState::Trash,
        })
        .unwrap();
        assert_eq!(body, json!({"stateTo": "TRASH"}));
    }

    #[test]
    fn bulk_update_serializes_filter_and_update() {
        let mut filter = Map::new();
        filter.insert("a".to_string(), json!(1));
        let mut update = Map::new();
        update.insert("$set".to_string(), json!({"b": 2}));
        let body = serde_json::to_value(BulkUpdate { filter, update }).unwrap();
        assert_eq!(body, json!({"filter": {"a": 1}, "update": {"$set": {"b": 2}}}));
    }
}
