use async_trait::async_trait;
use bytes::Bytes;
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dimse::AttributeSet;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod database_manager;
pub mod filesystem;
pub mod index;
mod locks;

pub use filesystem::FilesystemObjectStore;
pub use locks::KeyLocks;

/// Error type for object store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index error: {0}")]
    Index(#[from] redb::Error),
    #[error("Index record error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Instance {0} is already stored")]
    Duplicate(String),
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

macro_rules! index_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for StoreError {
            fn from(err: $ty) -> Self {
                StoreError::Index(err.into())
            }
        })*
    };
}

index_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

pub type StoreResult<T> = Result<T, StoreError>;

/// Attributes with a secondary `value -> instance` index
pub const SECONDARY_KEYS: [Tag; 7] = [
    tags::PATIENT_ID,
    tags::STUDY_INSTANCE_UID,
    tags::SERIES_INSTANCE_UID,
    tags::SOP_INSTANCE_UID,
    tags::SOP_CLASS_UID,
    tags::MODALITY,
    tags::ACCESSION_NUMBER,
];

/// A composite object known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInstance {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// Non-binary attributes of the dataset, always carrying both SOP UIDs
    pub attributes: AttributeSet,
}

impl StoredInstance {
    /// Build an instance from a dataset, keeping every non-binary attribute
    /// and stamping the given identity into them.
    pub fn new(
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
        dataset: &AttributeSet,
    ) -> Self {
        let sop_class_uid = sop_class_uid.into();
        let sop_instance_uid = sop_instance_uid.into();

        let mut attributes = dataset.without_binary();
        attributes.put(tags::SOP_CLASS_UID, dicom_core::VR::UI, sop_class_uid.as_str());
        attributes.put(
            tags::SOP_INSTANCE_UID,
            dicom_core::VR::UI,
            sop_instance_uid.as_str(),
        );

        Self {
            sop_class_uid,
            sop_instance_uid,
            attributes,
        }
    }

    /// Build an instance from the identity carried by the dataset itself
    pub fn from_dataset(dataset: &AttributeSet) -> StoreResult<Self> {
        let sop_class_uid = dataset
            .required(tags::SOP_CLASS_UID)
            .ok_or_else(|| StoreError::InvalidInstance("missing SOP Class UID".to_string()))?;
        let sop_instance_uid = dataset
            .required(tags::SOP_INSTANCE_UID)
            .ok_or_else(|| StoreError::InvalidInstance("missing SOP Instance UID".to_string()))?;
        Ok(Self::new(sop_class_uid, sop_instance_uid, dataset))
    }
}

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// An instance with the same SOP Instance UID was overwritten
    Replaced,
}

/// What to do when an instance is stored twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Replace the stored instance and log a warning
    #[default]
    Overwrite,
    /// Refuse the second write
    Reject,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(DuplicatePolicy::Overwrite),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(StoreError::Config(format!(
                "unknown duplicate policy '{}'",
                other
            ))),
        }
    }
}

/// Persistent, indexed store of composite objects keyed by SOP Instance UID
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Persist an instance. Readers never observe a partially written object
    /// and a failed write leaves nothing behind.
    async fn put(&self, instance: StoredInstance, payload: Bytes) -> StoreResult<PutOutcome>;

    async fn get(&self, sop_instance_uid: &str) -> StoreResult<Option<(StoredInstance, Bytes)>>;

    /// Lazy scan of every stored instance in SOP Instance UID order. Each
    /// call starts a fresh scan.
    fn list(&self) -> BoxStream<'static, StoreResult<StoredInstance>>;

    /// Whether `lookup` can answer exact-value queries on this tag
    fn is_indexed(&self, tag: Tag) -> bool;

    /// Instances whose value for `tag` equals `value`, through the secondary
    /// index. Fails with `Config` for tags without one.
    async fn lookup(&self, tag: Tag, value: &str) -> StoreResult<Vec<StoredInstance>>;

    async fn len(&self) -> StoreResult<usize>;
}

/// Configuration for the object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut options = HashMap::new();
        options.insert(
            "path".to_string(),
            serde_json::Value::String("./tmp".to_string()),
        );

        Self {
            backend: default_backend(),
            options,
        }
    }
}

fn default_backend() -> String {
    "filesystem".to_string()
}

impl StorageConfig {
    pub fn path(&self) -> &str {
        self.options
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("./tmp")
    }

    pub fn duplicate_policy(&self) -> StoreResult<DuplicatePolicy> {
        match self.options.get("duplicates") {
            None => Ok(DuplicatePolicy::default()),
            Some(value) => value
                .as_str()
                .ok_or_else(|| StoreError::Config("duplicates must be a string".to_string()))?
                .parse(),
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.backend != "filesystem" {
            return Err(StoreError::Config(format!(
                "Unknown storage backend: {}",
                self.backend
            )));
        }
        if self.path().trim().is_empty() {
            return Err(StoreError::Config("path cannot be empty".to_string()));
        }
        self.duplicate_policy()?;
        Ok(())
    }
}

/// Create an object store from configuration
pub fn create_object_store(config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    config.validate()?;
    match config.backend.as_str() {
        "filesystem" => {
            let store = FilesystemObjectStore::open(config.path(), config.duplicate_policy()?)?;
            Ok(Arc::new(store))
        }
        _ => Err(StoreError::Config(format!(
            "Unknown storage backend: {}",
            config.backend
        ))),
    }
}
