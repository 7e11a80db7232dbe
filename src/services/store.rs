use std::sync::Arc;

use async_trait::async_trait;
use dicom_dictionary_std::tags;
use dimse::{DimseCommand, DimseRequest, DimseResponse};

use crate::services::{DimseService, RequestContext, ServiceError};
use crate::storage::{ObjectStore, PutOutcome, StoredInstance};

/// Storage SOP classes (C-STORE)
#[derive(Debug, Clone)]
pub struct StorageService {
    store: Arc<dyn ObjectStore>,
}

impl StorageService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DimseService for StorageService {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn commands(&self) -> &'static [DimseCommand] {
        &[DimseCommand::Store]
    }

    async fn handle(
        &self,
        mut request: DimseRequest,
        _ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError> {
        let sop_class_uid = request
            .command
            .required(tags::AFFECTED_SOP_CLASS_UID)
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Validation("missing Affected SOP Class UID".to_string())
            })?;
        let sop_instance_uid = request
            .command
            .required(tags::AFFECTED_SOP_INSTANCE_UID)
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Validation("missing Affected SOP Instance UID".to_string())
            })?;

        let mut reader = request.take_dataset().ok_or_else(|| {
            ServiceError::Validation("C-STORE request carries no dataset".to_string())
        })?;
        let dataset = reader
            .read_dataset()
            .await
            .map_err(ServiceError::DatasetRead)?;

        for (tag, expected) in [
            (tags::SOP_CLASS_UID, &sop_class_uid),
            (tags::SOP_INSTANCE_UID, &sop_instance_uid),
        ] {
            match dataset.attributes.value(tag) {
                Some(found) if found != expected.as_str() => tracing::warn!(
                    "Dataset {} '{}' differs from command value '{}', storing under the command value",
                    tag,
                    found,
                    expected
                ),
                _ => {}
            }
        }

        let instance = StoredInstance::new(&sop_class_uid, &sop_instance_uid, &dataset.attributes);
        let size = dataset.payload.len();
        match self.store.put(instance, dataset.payload).await? {
            PutOutcome::Created => tracing::info!(
                "💾 Stored {} ({} bytes) from {}",
                sop_instance_uid,
                size,
                request.peer
            ),
            PutOutcome::Replaced => tracing::info!(
                "💾 Replaced {} ({} bytes) from {}",
                sop_instance_uid,
                size,
                request.peer
            ),
        }

        Ok(DimseResponse::success())
    }
}
