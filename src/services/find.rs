use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dimse::{DimseCommand, DimseRequest, DimseResponse, QueryLevel};
use futures_util::StreamExt;

use crate::matching;
use crate::services::{candidates, read_identifier, DimseService, RequestContext, ServiceError};
use crate::storage::ObjectStore;

/// Query/Retrieve FIND SOP classes (C-FIND)
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<dyn ObjectStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// Attribute that identifies one entity at a query level above IMAGE
fn unique_key(level: QueryLevel) -> Option<Tag> {
    match level {
        QueryLevel::Patient => Some(tags::PATIENT_ID),
        QueryLevel::Study => Some(tags::STUDY_INSTANCE_UID),
        QueryLevel::Series => Some(tags::SERIES_INSTANCE_UID),
        QueryLevel::Image => None,
    }
}

#[async_trait]
impl DimseService for QueryService {
    fn name(&self) -> &'static str {
        "query"
    }

    fn commands(&self) -> &'static [DimseCommand] {
        &[DimseCommand::Find]
    }

    async fn handle(
        &self,
        mut request: DimseRequest,
        ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError> {
        let identifier = read_identifier(&mut request).await?;
        let level_key = QueryLevel::of(&identifier).and_then(unique_key);
        tracing::debug!("🔍 C-FIND from {}: {}", request.peer, identifier);

        let mut scan = candidates(&self.store, &identifier).await?;
        let mut seen = HashSet::new();
        let mut matched = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                next = scan.next() => Some(next),
            };
            let candidate = match next {
                None => {
                    tracing::info!("C-FIND cancelled after {} matches", matched);
                    return Ok(DimseResponse::cancel());
                }
                Some(None) => break,
                Some(Some(candidate)) => candidate?,
            };

            if !matching::matches(&identifier, &candidate.attributes) {
                continue;
            }
            if let Some(key) = level_key.and_then(|tag| candidate.attributes.required(tag)) {
                if !seen.insert(key.to_string()) {
                    continue;
                }
            }

            let projected = matching::project(&identifier, &candidate.attributes);
            if !ctx.send_pending(DimseResponse::pending(projected)).await? {
                tracing::info!("C-FIND cancelled after {} matches", matched);
                return Ok(DimseResponse::cancel());
            }
            matched += 1;
        }

        tracing::info!("C-FIND from {} returned {} matches", request.peer, matched);
        Ok(DimseResponse::success())
    }
}
