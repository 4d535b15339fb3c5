use async_trait::async_trait;
use keel_core::Result;

use crate::item::{Condition, Item, ItemKey, Query, UpdateExpr, WriteOp};

/// The storage collaborator.
///
/// Every write is conditional and bumps the item's version. A failed condition
/// surfaces as `KeelError::ConcurrentModification`; updating an item that does not
/// exist surfaces as `KeelError::NotFound`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>>;

    /// Write the whole item. Returns the stored item with its new version.
    async fn put(&self, item: Item, condition: Condition) -> Result<Item>;

    /// Apply a partial update to an existing item.
    async fn update(&self, key: &ItemKey, condition: Condition, update: UpdateExpr)
    -> Result<Item>;

    async fn query(&self, query: Query) -> Result<Vec<Item>>;

    /// Apply every op or none of them. At most one op per key.
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<()>;
}
