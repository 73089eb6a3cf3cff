//! Physical condition recorded alongside a scan.

use serde::{Deserialize, Serialize};

use crate::ids::StateId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCondition {
    pub id: StateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ItemCondition {
    fn builtin(id: i64, name: &str, description: &str) -> Self {
        Self {
            id: StateId(id),
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Conditions offered when the server list is unavailable.
pub fn default_conditions() -> Vec<ItemCondition> {
    vec![
        ItemCondition::builtin(1, "In order", "Item verified and in good condition."),
        ItemCondition::builtin(2, "Repair", "Item flagged for repair."),
        ItemCondition::builtin(3, "Damaged", "Item physically damaged."),
        ItemCondition::builtin(4, "Lost", "Item reported as lost."),
    ]
}
