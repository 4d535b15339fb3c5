use keel_core::{KeelError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::item::{Item, ItemKey};

/// Serialize an entity into a not-yet-written item.
pub fn encode<T: Serialize>(key: ItemKey, value: &T) -> Result<Item> {
    Ok(Item::new(key, serde_json::to_value(value)?))
}

/// Deserialize a stored item back into its entity.
pub fn decode<T: DeserializeOwned>(item: &Item) -> Result<T> {
    serde_json::from_value(item.data.clone())
        .map_err(|e| KeelError::Storage(format!("corrupt item {}: {e}", item.key)))
}
