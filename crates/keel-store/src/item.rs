use keel_core::{KeelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Partition + sort key of a stored item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// A stored record. `version` starts at 1 and is bumped by every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,
    pub version: u64,
    pub data: Value,
}

impl Item {
    /// A new, not-yet-written item. The repository assigns the version on write.
    pub fn new(key: ItemKey, data: Value) -> Self {
        Self {
            key,
            version: 0,
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Precondition evaluated atomically with a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    NotExists,
    Exists,
    VersionIs(u64),
    FieldEquals(String, Value),
}

impl Condition {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals(field.into(), value.into())
    }

    pub fn holds(&self, existing: Option<&Item>) -> bool {
        match (self, existing) {
            (Self::Always, _) => true,
            (Self::NotExists, existing) => existing.is_none(),
            (Self::Exists, existing) => existing.is_some(),
            (Self::VersionIs(v), Some(item)) => item.version == *v,
            (Self::FieldEquals(field, value), Some(item)) => item.field(field) == Some(value),
            (Self::VersionIs(_) | Self::FieldEquals(..), None) => false,
        }
    }

    /// Check the condition, surfacing a failure as a concurrent-modification conflict.
    pub fn check(&self, key: &ItemKey, existing: Option<&Item>) -> Result<()> {
        if self.holds(existing) {
            return Ok(());
        }
        let reason = match (self, existing) {
            (Self::NotExists, _) => "item already exists".to_string(),
            (_, None) => "item does not exist".to_string(),
            (Self::VersionIs(v), Some(item)) => {
                format!("expected version {v}, found {}", item.version)
            }
            (Self::FieldEquals(field, value), Some(item)) => format!(
                "expected {field} = {value}, found {}",
                item.field(field).cloned().unwrap_or(Value::Null)
            ),
            _ => "condition failed".to_string(),
        };
        Err(KeelError::conflict(key.to_string(), reason))
    }
}

/// One clause of a partial update against an item's top-level fields.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Remove(String),
    /// Numeric increment; a missing field counts as zero.
    Add(String, f64),
}

/// An expression-like partial update, applied clause by clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpr {
    pub ops: Vec<UpdateOp>,
}

impl UpdateExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Remove(field.into()));
        self
    }

    pub fn add(mut self, field: impl Into<String>, delta: f64) -> Self {
        self.ops.push(UpdateOp::Add(field.into(), delta));
        self
    }

    pub fn apply(&self, key: &ItemKey, data: &mut Value) -> Result<()> {
        if data.is_null() {
            *data = Value::Object(Map::new());
        }
        let Some(obj) = data.as_object_mut() else {
            return Err(KeelError::Storage(format!(
                "{key}: partial update on a non-object item"
            )));
        };
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    obj.insert(field.clone(), value.clone());
                }
                UpdateOp::Remove(field) => {
                    obj.remove(field);
                }
                UpdateOp::Add(field, delta) => {
                    let current = match obj.get(field) {
                        None | Some(Value::Null) => 0.0,
                        Some(v) => v.as_f64().ok_or_else(|| {
                            KeelError::Storage(format!("{key}: field {field} is not numeric"))
                        })?,
                    };
                    let next = current + delta;
                    // Keep integral counters as integers so they read back as u64/i64.
                    let value = if next.fract() == 0.0 && next.abs() < 9.0e15 {
                        Value::from(next as i64)
                    } else {
                        Value::from(next)
                    };
                    obj.insert(field.clone(), value);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Range query within one partition by sort-key prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub pk: String,
    pub sk_prefix: String,
    pub order: Order,
    pub limit: Option<usize>,
}

impl Query {
    pub fn prefix(pk: impl Into<String>, sk_prefix: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk_prefix: sk_prefix.into(),
            order: Order::Ascending,
            limit: None,
        }
    }

    pub fn descending(mut self) -> Self {
        self.order = Order::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One member of an atomic multi-item write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        item: Item,
        condition: Condition,
    },
    Update {
        key: ItemKey,
        condition: Condition,
        update: UpdateExpr,
    },
    Delete {
        key: ItemKey,
        condition: Condition,
    },
}

impl WriteOp {
    pub fn key(&self) -> &ItemKey {
        match self {
            Self::Put { item, .. } => &item.key,
            Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Compute the post-write state of one op against the current map without mutating it.
/// `None` means the key is deleted.
pub(crate) fn stage(existing: Option<&Item>, op: &WriteOp) -> Result<Option<Item>> {
    let key = op.key();
    match op {
        WriteOp::Put { item, condition } => {
            condition.check(key, existing)?;
            Ok(Some(Item {
                key: key.clone(),
                version: existing.map_or(1, |e| e.version + 1),
                data: item.data.clone(),
            }))
        }
        WriteOp::Update {
            condition, update, ..
        } => {
            let Some(existing) = existing else {
                return Err(KeelError::not_found("item", key.to_string()));
            };
            condition.check(key, Some(existing))?;
            let mut data = existing.data.clone();
            if data.is_null() {
                data = Value::Object(Default::default());
            }
            update.apply(key, &mut data)?;
            Ok(Some(Item {
                key: key.clone(),
                version: existing.version + 1,
                data,
            }))
        }
        WriteOp::Delete { condition, .. } => {
            condition.check(key, existing)?;
            Ok(None)
        }
    }
}

pub(crate) fn ensure_distinct_keys(ops: &[WriteOp]) -> Result<()> {
    let mut seen = HashSet::new();
    for op in ops {
        if !seen.insert(op.key()) {
            return Err(KeelError::Storage(format!(
                "transaction touches {} more than once",
                op.key()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(version: u64, data: Value) -> Item {
        Item {
            key: ItemKey::new("P", "S"),
            version,
            data,
        }
    }

    #[test]
    fn conditions() {
        let item = stored(3, json!({"status": "pending"}));
        assert!(Condition::Always.holds(None));
        assert!(Condition::NotExists.holds(None));
        assert!(!Condition::NotExists.holds(Some(&item)));
        assert!(Condition::VersionIs(3).holds(Some(&item)));
        assert!(!Condition::VersionIs(2).holds(Some(&item)));
        assert!(Condition::field_equals("status", "pending").holds(Some(&item)));
        assert!(!Condition::field_equals("status", "executed").holds(Some(&item)));
        assert!(!Condition::field_equals("status", "pending").holds(None));
    }

    #[test]
    fn failed_condition_is_conflict() {
        let key = ItemKey::new("P", "S");
        let item = stored(3, json!({}));
        let err = Condition::VersionIs(1).check(&key, Some(&item)).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("expected version 1, found 3"));
    }

    #[test]
    fn update_expression_applies_in_order() {
        let key = ItemKey::new("P", "S");
        let mut data = json!({"a": 1, "gone": true});
        UpdateExpr::new()
            .set("status", "executed")
            .remove("gone")
            .add("a", 2.0)
            .add("fresh", -1.0)
            .apply(&key, &mut data)
            .unwrap();
        assert_eq!(data, json!({"a": 3, "status": "executed", "fresh": -1}));
    }

    #[test]
    fn add_on_non_numeric_field_fails() {
        let key = ItemKey::new("P", "S");
        let mut data = json!({"a": "x"});
        assert!(UpdateExpr::new().add("a", 1.0).apply(&key, &mut data).is_err());
    }
}
