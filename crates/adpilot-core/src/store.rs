//! Durable state in a single redb database.
//!
//! # Table design
//!
//! One table per record kind, each `&str → &[u8]` with a JSON value. Keys are
//! chosen so that the listings the engine needs are prefix scans:
//!
//! ```text
//! jobs                 <job_id>
//! schedules            <schedule_id>
//! schedule_executions  <schedule_id>/<started_ms:020>/<execution_id>
//! init_tasks           <account_id>/<task_id>
//! account_sync         <account_id>
//! automation_configs   <account_id>
//! daily_stats          <account_id>/<local_date>
//! batches              <account_id>/<created_ms:020>/<batch_id>
//! details              <batch_id>-<seq:04>
//! approvals            <approval_id>
//! ```
//!
//! Read-modify-write goes through [`Store::update`] / [`Store::upsert`], which
//! run the closure inside one write transaction. redb serializes write
//! transactions, so each update is a compare-and-set against the latest
//! committed value.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AdpilotError, Result};

pub type Table = TableDefinition<'static, &'static str, &'static [u8]>;

pub const JOBS: Table = TableDefinition::new("jobs");
pub const SCHEDULES: Table = TableDefinition::new("schedules");
pub const SCHEDULE_EXECUTIONS: Table = TableDefinition::new("schedule_executions");
pub const INIT_TASKS: Table = TableDefinition::new("init_tasks");
pub const ACCOUNT_SYNC: Table = TableDefinition::new("account_sync");
pub const AUTOMATION_CONFIGS: Table = TableDefinition::new("automation_configs");
pub const DAILY_STATS: Table = TableDefinition::new("daily_stats");
pub const BATCHES: Table = TableDefinition::new("batches");
pub const DETAILS: Table = TableDefinition::new("details");
pub const APPROVALS: Table = TableDefinition::new("approvals");

const ALL_TABLES: [Table; 10] = [
    JOBS,
    SCHEDULES,
    SCHEDULE_EXECUTIONS,
    INIT_TASKS,
    ACCOUNT_SYNC,
    AUTOMATION_CONFIGS,
    DAILY_STATS,
    BATCHES,
    DETAILS,
    APPROVALS,
];

fn db_err(e: impl std::fmt::Display) -> AdpilotError {
    AdpilotError::Storage(e.to_string())
}

/// Zero-padded millisecond timestamp so keys sort chronologically.
pub fn ts_key(ts: chrono::DateTime<chrono::Utc>) -> String {
    format!("{:020}", ts.timestamp_millis().max(0))
}

pub struct Store {
    db: Database,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for table in ALL_TABLES {
            wt.open_table(table).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        match t.get(key).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = wt.open_table(table).map_err(db_err)?;
            t.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Write `value` only if `key` is absent. Returns false when it exists.
    pub fn insert_new<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = wt.open_table(table).map_err(db_err)?;
            if t.get(key).map_err(db_err)?.is_some() {
                return Ok(false);
            }
            t.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Write several records to one table in a single transaction.
    pub fn put_many<T: Serialize>(&self, table: Table, items: &[(String, T)]) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = wt.open_table(table).map_err(db_err)?;
            for (key, value) in items {
                let bytes = serde_json::to_vec(value)?;
                t.insert(key.as_str(), bytes.as_slice()).map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut t = wt.open_table(table).map_err(db_err)?;
            let removed = t.remove(key).map_err(db_err)?;
            removed.is_some()
        };
        wt.commit().map_err(db_err)?;
        Ok(existed)
    }

    /// Remove every record whose key starts with `prefix`.
    pub fn delete_prefix(&self, table: Table, prefix: &str) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut t = wt.open_table(table).map_err(db_err)?;
            let mut keys = Vec::new();
            for entry in t.range(prefix..).map_err(db_err)? {
                let (k, _) = entry.map_err(db_err)?;
                let k = k.value();
                if !k.starts_with(prefix) {
                    break;
                }
                keys.push(k.to_string());
            }
            for k in &keys {
                t.remove(k.as_str()).map_err(db_err)?;
            }
            keys.len()
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    /// All values whose key starts with `prefix`, in key order.
    pub fn list<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> Result<Vec<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.range(prefix..).map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            if !k.value().starts_with(prefix) {
                break;
            }
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    /// Read-modify-write of an existing record in one transaction.
    ///
    /// Returns `Ok(None)` if the key is absent. If `f` fails nothing is
    /// written and its error is returned.
    pub fn update<T, F>(&self, table: Table, key: &str, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let updated = {
            let mut t = wt.open_table(table).map_err(db_err)?;
            let current = t.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
            let Some(bytes) = current else {
                return Ok(None);
            };
            let mut value: T = serde_json::from_slice(&bytes)?;
            f(&mut value)?;
            let bytes = serde_json::to_vec(&value)?;
            t.insert(key, bytes.as_slice()).map_err(db_err)?;
            value
        };
        wt.commit().map_err(db_err)?;
        Ok(Some(updated))
    }

    /// Like [`update`](Self::update) but starts from `init()` when the key is
    /// absent.
    pub fn upsert<T, I, F, R>(&self, table: Table, key: &str, init: I, f: F) -> Result<(T, R)>
    where
        T: Serialize + DeserializeOwned,
        I: FnOnce() -> T,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let out = {
            let mut t = wt.open_table(table).map_err(db_err)?;
            let current = t.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
            let mut value: T = match current {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => init(),
            };
            let r = f(&mut value)?;
            let bytes = serde_json::to_vec(&value)?;
            t.insert(key, bytes.as_slice()).map_err(db_err)?;
            (value, r)
        };
        wt.commit().map_err(db_err)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
    }

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join(".adpilot/test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, store) = open_tmp();
        store.put(JOBS, "j1", &Rec { n: 1 }).unwrap();
        assert_eq!(store.get::<Rec>(JOBS, "j1").unwrap(), Some(Rec { n: 1 }));
        assert!(store.delete(JOBS, "j1").unwrap());
        assert!(!store.delete(JOBS, "j1").unwrap());
        assert_eq!(store.get::<Rec>(JOBS, "j1").unwrap(), None);
    }

    #[test]
    fn list_is_prefix_scoped_and_ordered() {
        let (_dir, store) = open_tmp();
        store.put(INIT_TASKS, "acct-b/001", &Rec { n: 9 }).unwrap();
        store.put(INIT_TASKS, "acct-a/002", &Rec { n: 2 }).unwrap();
        store.put(INIT_TASKS, "acct-a/001", &Rec { n: 1 }).unwrap();
        store.put(INIT_TASKS, "acct-ab/001", &Rec { n: 7 }).unwrap();
        let got: Vec<Rec> = store.list(INIT_TASKS, "acct-a/").unwrap();
        assert_eq!(got, vec![Rec { n: 1 }, Rec { n: 2 }]);
        assert_eq!(store.list::<Rec>(INIT_TASKS, "").unwrap().len(), 4);
    }

    #[test]
    fn insert_new_refuses_overwrite() {
        let (_dir, store) = open_tmp();
        assert!(store.insert_new(DETAILS, "b-0000", &Rec { n: 1 }).unwrap());
        assert!(!store.insert_new(DETAILS, "b-0000", &Rec { n: 2 }).unwrap());
        assert_eq!(store.get::<Rec>(DETAILS, "b-0000").unwrap(), Some(Rec { n: 1 }));
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (_dir, store) = open_tmp();
        store.put(JOBS, "j", &Rec { n: 1 }).unwrap();
        let err = store
            .update::<Rec, _>(JOBS, "j", |r| {
                r.n = 99;
                Err(AdpilotError::InvalidInput("no".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AdpilotError::InvalidInput(_)));
        assert_eq!(store.get::<Rec>(JOBS, "j").unwrap(), Some(Rec { n: 1 }));
        assert!(store
            .update::<Rec, _>(JOBS, "missing", |_| Ok(()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn upsert_initializes_then_mutates() {
        let (_dir, store) = open_tmp();
        let (v, r) = store
            .upsert(DAILY_STATS, "a/2025-01-01", || Rec { n: 0 }, |rec: &mut Rec| {
                rec.n += 1;
                Ok(rec.n)
            })
            .unwrap();
        assert_eq!((v.n, r), (1, 1));
        let (v, _) = store
            .upsert(DAILY_STATS, "a/2025-01-01", || Rec { n: 0 }, |rec: &mut Rec| {
                rec.n += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(v.n, 2);
    }

    #[test]
    fn delete_prefix_removes_only_matching() {
        let (_dir, store) = open_tmp();
        store.put(INIT_TASKS, "a/1", &Rec { n: 1 }).unwrap();
        store.put(INIT_TASKS, "a/2", &Rec { n: 2 }).unwrap();
        store.put(INIT_TASKS, "b/1", &Rec { n: 3 }).unwrap();
        assert_eq!(store.delete_prefix(INIT_TASKS, "a/").unwrap(), 2);
        assert_eq!(store.list::<Rec>(INIT_TASKS, "").unwrap(), vec![Rec { n: 3 }]);
    }

    #[test]
    fn ts_key_sorts_chronologically() {
        use chrono::TimeZone;
        let a = chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let b = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert!(ts_key(a) < ts_key(b));
        assert_eq!(ts_key(a).len(), 20);
    }
}
