use chrono::{DateTime, Utc};
use dicom_core::Tag;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use crate::storage::database_manager::{initialize_tables, open_database, DatabaseOperation};
use crate::storage::{StoreResult, StoredInstance, SECONDARY_KEYS};

/// Index entry for one stored instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub instance: StoredInstance,
    /// Payload file, relative to the store root
    pub payload_path: String,
    pub payload_len: u64,
    pub stored_at: DateTime<Utc>,
}

// SOP Instance UID -> JSON IndexRecord
const INSTANCES: TableDefinition<&str, &str> = TableDefinition::new("instances");
// "GGGGEEEE=value\0uid" -> SOP Instance UID
const INSTANCES_BY_KEY: TableDefinition<&str, &str> = TableDefinition::new("instances_by_key");

/// Instance index with secondary keys for exact-value lookups
#[derive(Debug, Clone)]
pub struct InstanceIndex {
    db: Arc<Database>,
}

fn key_prefix(tag: Tag, value: &str) -> String {
    format!("{:04X}{:04X}={}\0", tag.group(), tag.element(), value)
}

fn secondary_keys(instance: &StoredInstance) -> Vec<String> {
    let mut keys = Vec::new();
    for tag in SECONDARY_KEYS {
        if let Some(attr) = instance.attributes.get(tag) {
            for value in attr.values().filter(|v| !v.is_empty()) {
                let key = format!("{}{}", key_prefix(tag, value), instance.sop_instance_uid);
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
    }
    keys
}

impl InstanceIndex {
    /// Open or create the index database
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let db = open_database(db_path)?;
        initialize_tables(&db, &[INSTANCES, INSTANCES_BY_KEY])?;
        Ok(Self { db })
    }

    pub fn get(&self, sop_instance_uid: &str) -> StoreResult<Option<IndexRecord>> {
        DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES)?;
            let record = match table.get(sop_instance_uid)? {
                Some(value) => Some(serde_json::from_str(value.value())?),
                None => None,
            };
            Ok(record)
        })
    }

    /// Insert or replace a record and its secondary keys in one transaction.
    /// Returns the record it replaced.
    pub fn upsert(&self, record: &IndexRecord) -> StoreResult<Option<IndexRecord>> {
        let json = serde_json::to_string(record)?;
        let uid = record.instance.sop_instance_uid.as_str();

        let previous = DatabaseOperation::write(&self.db, |txn| {
            let previous: Option<IndexRecord> = {
                let mut table = txn.open_table(INSTANCES)?;
                let previous = match table.insert(uid, json.as_str())? {
                    Some(old) => Some(serde_json::from_str(old.value())?),
                    None => None,
                };
                previous
            };

            let mut by_key = txn.open_table(INSTANCES_BY_KEY)?;
            if let Some(old) = &previous {
                for key in secondary_keys(&old.instance) {
                    by_key.remove(key.as_str())?;
                }
            }
            for key in secondary_keys(&record.instance) {
                by_key.insert(key.as_str(), uid)?;
            }
            Ok(previous)
        })?;

        tracing::debug!("📇 Indexed instance: sop_instance_uid={}", uid);
        Ok(previous)
    }

    /// Up to `limit` records in SOP Instance UID order, strictly after `after`
    pub fn page(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<IndexRecord>> {
        DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES)?;
            let start = match after {
                Some(uid) => Bound::Excluded(uid),
                None => Bound::Unbounded,
            };

            let mut records = Vec::new();
            for entry in table.range::<&str>((start, Bound::Unbounded))? {
                if records.len() >= limit {
                    break;
                }
                let (_, value) = entry?;
                records.push(serde_json::from_str(value.value())?);
            }
            Ok(records)
        })
    }

    /// SOP Instance UIDs whose `tag` holds `value`
    pub fn lookup(&self, tag: Tag, value: &str) -> StoreResult<Vec<String>> {
        let prefix = key_prefix(tag, value);
        let uids = DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES_BY_KEY)?;

            let mut uids = Vec::new();
            for entry in table.range::<&str>(prefix.as_str()..)? {
                let (key, uid) = entry?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                uids.push(uid.value().to_string());
            }
            Ok(uids)
        })?;

        tracing::debug!("📇 Found {} instances for {}={}", uids.len(), tag, value);
        Ok(uids)
    }

    pub fn len(&self) -> StoreResult<usize> {
        DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES)?;
            Ok(table.len()? as usize)
        })
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
