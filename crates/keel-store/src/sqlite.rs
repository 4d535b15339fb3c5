use async_trait::async_trait;
use keel_core::{KeelError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::item::{
    Condition, Item, ItemKey, Order, Query, UpdateExpr, WriteOp, ensure_distinct_keys, stage,
};
use crate::repository::Repository;

fn storage_err(e: rusqlite::Error) -> KeelError {
    KeelError::Storage(e.to_string())
}

/// Single-table SQLite repository. Items are stored as JSON text keyed by
/// `(pk, sk)`; the connection lock serializes writers.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening keel store");

        let conn = Connection::open(path).map_err(storage_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS items (
                pk TEXT NOT NULL,
                sk TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (pk, sk)
            );
            ",
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }
}

fn read_item(conn: &Connection, key: &ItemKey) -> Result<Option<Item>> {
    let row = conn
        .query_row(
            "SELECT version, data FROM items WHERE pk = ?1 AND sk = ?2",
            params![key.pk, key.sk],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(storage_err)?;
    match row {
        Some((version, data)) => Ok(Some(Item {
            key: key.clone(),
            version: version as u64,
            data: serde_json::from_str(&data)?,
        })),
        None => Ok(None),
    }
}

fn write_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT INTO items (pk, sk, version, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(pk, sk) DO UPDATE SET version = excluded.version, data = excluded.data",
        params![
            item.key.pk,
            item.key.sk,
            item.version as i64,
            serde_json::to_string(&item.data)?
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn delete_item(conn: &Connection, key: &ItemKey) -> Result<()> {
    conn.execute(
        "DELETE FROM items WHERE pk = ?1 AND sk = ?2",
        params![key.pk, key.sk],
    )
    .map_err(storage_err)?;
    Ok(())
}

/// Stage one op against the current row and persist the result.
fn apply(conn: &Connection, op: &WriteOp) -> Result<Option<Item>> {
    let existing = read_item(conn, op.key())?;
    let next = stage(existing.as_ref(), op)?;
    match &next {
        Some(item) => write_item(conn, item)?,
        None => delete_item(conn, op.key())?,
    }
    Ok(next)
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        let conn = self.conn.lock();
        read_item(&conn, key)
    }

    async fn put(&self, item: Item, condition: Condition) -> Result<Item> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let stored = apply(&tx, &WriteOp::Put { item, condition })?
            .ok_or_else(|| KeelError::Storage("put staged a delete".into()))?;
        tx.commit().map_err(storage_err)?;
        Ok(stored)
    }

    async fn update(
        &self,
        key: &ItemKey,
        condition: Condition,
        update: UpdateExpr,
    ) -> Result<Item> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let op = WriteOp::Update {
            key: key.clone(),
            condition,
            update,
        };
        let stored =
            apply(&tx, &op)?.ok_or_else(|| KeelError::Storage("update staged a delete".into()))?;
        tx.commit().map_err(storage_err)?;
        Ok(stored)
    }

    async fn query(&self, query: Query) -> Result<Vec<Item>> {
        let conn = self.conn.lock();
        let order = match query.order {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        };
        let sql = format!(
            "SELECT sk, version, data FROM items
             WHERE pk = ?1 AND substr(sk, 1, length(?2)) = ?2
             ORDER BY sk {order} LIMIT ?3"
        );
        // SQLite treats a negative LIMIT as unbounded.
        let limit = query.limit.map_or(-1, |l| l as i64);
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![query.pk, query.sk_prefix, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(storage_err)?;

        let mut items = Vec::new();
        for row in rows {
            let (sk, version, data) = row.map_err(storage_err)?;
            items.push(Item {
                key: ItemKey::new(query.pk.clone(), sk),
                version: version as u64,
                data: serde_json::from_str(&data)?,
            });
        }
        Ok(items)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<()> {
        ensure_distinct_keys(&ops)?;
        let mut conn = self.conn.lock();
        // Dropping the transaction on an early return rolls it back.
        let tx = conn.transaction().map_err(storage_err)?;
        for op in &ops {
            apply(&tx, op)?;
        }
        tx.commit().map_err(storage_err)?;
        debug!(ops = ops.len(), "transaction committed");
        Ok(())
    }
}
