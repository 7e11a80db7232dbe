//! DIMSE services provided by the SCP core
//!
//! Each service handles the commands of the SOP classes it is registered
//! for. Pending responses are streamed through the request context; the
//! value returned from [`DimseService::handle`] is the final response.

use std::sync::Arc;

use async_trait::async_trait;
use dimse::{
    AttributeSet, DimseCommand, DimseError, DimseRequest, DimseResponse, ResponseSender,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::matching;
use crate::storage::{ObjectStore, StoreError, StoreResult, StoredInstance};

pub mod echo;
pub mod find;
pub mod registry;
pub mod retrieve;
pub mod store;

pub use echo::VerificationService;
pub use find::QueryService;
pub use registry::ServiceRegistry;
pub use retrieve::{RetrieveOutcome, RetrieveService, RetrieveState};
pub use store::StorageService;

/// Request-scoped failure of a service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing command elements
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Object store failure: {0}")]
    Storage(#[from] StoreError),

    /// The inbound dataset could not be read or decoded
    #[error("Failed to receive dataset: {0}")]
    DatasetRead(#[source] DimseError),

    #[error("SOP class {0} is not supported")]
    UnsupportedSopClass(String),

    #[error("{command} is not supported for SOP class {sop_class_uid}")]
    UnsupportedOperation {
        command: String,
        sop_class_uid: String,
    },

    #[error("Move destination '{0}' is unknown")]
    MoveDestinationUnknown(String),

    /// The transport dropped the response stream
    #[error("Response stream closed")]
    ResponseChannelClosed,
}

/// Per-request handles a service works with
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Fires on C-CANCEL, peer abort or association release
    pub cancel: CancellationToken,
    pub responses: ResponseSender,
}

impl RequestContext {
    pub fn new(responses: ResponseSender, cancel: CancellationToken) -> Self {
        Self { cancel, responses }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send an intermediate (Pending) response
    pub async fn send(&self, response: DimseResponse) -> Result<(), ServiceError> {
        self.responses
            .send(response)
            .await
            .map_err(|_| ServiceError::ResponseChannelClosed)
    }

    /// Send a Pending response unless the request is cancelled first.
    /// Returns `false` on cancellation.
    pub async fn send_pending(&self, response: DimseResponse) -> Result<bool, ServiceError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(false),
            sent = self.send(response) => sent.map(|_| true),
        }
    }
}

#[async_trait]
pub trait DimseService: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Commands this service accepts
    fn commands(&self) -> &'static [DimseCommand];

    /// Handle one request and return its final response
    async fn handle(
        &self,
        request: DimseRequest,
        ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError>;
}

/// Read the identifier dataset that follows a C-FIND or C-MOVE command
pub(crate) async fn read_identifier(
    request: &mut DimseRequest,
) -> Result<AttributeSet, ServiceError> {
    let mut reader = request
        .take_dataset()
        .ok_or_else(|| ServiceError::Validation("request carries no identifier".to_string()))?;
    let dataset = reader
        .read_dataset()
        .await
        .map_err(ServiceError::DatasetRead)?;
    Ok(dataset.attributes)
}

/// Candidate instances for a query identifier, in SOP Instance UID order.
///
/// Uses the secondary index when the identifier carries a single-value key on
/// an indexed tag and falls back to a full scan otherwise. Candidates still
/// have to pass [`matching::matches`].
pub(crate) async fn candidates(
    store: &Arc<dyn ObjectStore>,
    identifier: &AttributeSet,
) -> Result<BoxStream<'static, StoreResult<StoredInstance>>, ServiceError> {
    let indexed = matching::exact_keys(identifier)
        .into_iter()
        .find(|(tag, _)| store.is_indexed(*tag));

    match indexed {
        Some((tag, value)) => {
            tracing::debug!("Index lookup on {} = '{}'", tag, value);
            let hits = store.lookup(tag, value).await?;
            Ok(stream::iter(hits.into_iter().map(Ok)).boxed())
        }
        None => Ok(store.list()),
    }
}
