use async_trait::async_trait;
use keel_core::{KeelError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::item::{
    Condition, Item, ItemKey, Order, Query, UpdateExpr, WriteOp, ensure_distinct_keys, stage,
};
use crate::repository::Repository;

/// In-process repository. A single lock makes every operation, including
/// `transact`, atomic with respect to every other.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    items: Arc<Mutex<BTreeMap<ItemKey, Item>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn put(&self, item: Item, condition: Condition) -> Result<Item> {
        let mut items = self.items.lock();
        let op = WriteOp::Put { item, condition };
        let staged = stage(items.get(op.key()), &op)?;
        let stored = staged.ok_or_else(|| KeelError::Storage("put staged a delete".into()))?;
        items.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        key: &ItemKey,
        condition: Condition,
        update: UpdateExpr,
    ) -> Result<Item> {
        let mut items = self.items.lock();
        let op = WriteOp::Update {
            key: key.clone(),
            condition,
            update,
        };
        let staged = stage(items.get(key), &op)?;
        let stored = staged.ok_or_else(|| KeelError::Storage("update staged a delete".into()))?;
        items.insert(key.clone(), stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: Query) -> Result<Vec<Item>> {
        let items = self.items.lock();
        let start = ItemKey::new(query.pk.clone(), query.sk_prefix.clone());
        let matching = items
            .range(start..)
            .take_while(|(k, _)| k.pk == query.pk && k.sk.starts_with(&query.sk_prefix))
            .map(|(_, item)| item.clone());
        let limit = query.limit.unwrap_or(usize::MAX);
        let out = match query.order {
            Order::Ascending => matching.take(limit).collect(),
            Order::Descending => {
                let mut all: Vec<Item> = matching.collect();
                all.reverse();
                all.truncate(limit);
                all
            }
        };
        Ok(out)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<()> {
        ensure_distinct_keys(&ops)?;
        let mut items = self.items.lock();
        let mut staged = Vec::with_capacity(ops.len());
        for op in &ops {
            staged.push((op.key().clone(), stage(items.get(op.key()), op)?));
        }
        for (key, next) in staged {
            match next {
                Some(item) => {
                    items.insert(key, item);
                }
                None => {
                    items.remove(&key);
                }
            }
        }
        Ok(())
    }
}
