//! C-MOVE: match instances, then push each one to the move destination as a
//! C-STORE sub-operation on a single outbound association.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dicom_dictionary_std::tags;
use dimse::{
    status, AeDirectory, AttributeSet, DimseCommand, DimseRequest, DimseResponse, DimseStatus,
    OutboundAssociation, OutboundAssociator, RemoteNode, StoreSubOperation, SubOperationCounts,
    SubOperationOutcome, TransferError,
};
use futures_util::StreamExt;

use crate::matching;
use crate::services::{candidates, read_identifier, DimseService, RequestContext, ServiceError};
use crate::storage::{ObjectStore, StoredInstance};

/// Phase of a C-MOVE request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveState {
    Resolving,
    Matching,
    Transferring,
    Completed,
    Failed,
}

/// Progress of one C-MOVE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveOutcome {
    pub state: RetrieveState,
    pub counts: SubOperationCounts,
}

impl Default for RetrieveOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrieveOutcome {
    pub fn new() -> Self {
        Self {
            state: RetrieveState::Resolving,
            counts: SubOperationCounts::default(),
        }
    }

    fn advance(&mut self, state: RetrieveState) {
        tracing::trace!("C-MOVE {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Start transferring `total` matched instances
    pub fn matched(&mut self, total: u32) {
        self.counts = SubOperationCounts::new(total);
        self.advance(RetrieveState::Transferring);
    }

    pub fn completed(&mut self) {
        self.counts.remaining = self.counts.remaining.saturating_sub(1);
        self.counts.completed += 1;
    }

    pub fn warned(&mut self) {
        self.counts.remaining = self.counts.remaining.saturating_sub(1);
        self.counts.warning += 1;
    }

    pub fn failed(&mut self) {
        self.counts.remaining = self.counts.remaining.saturating_sub(1);
        self.counts.failed += 1;
    }

    /// Final status once every matched instance was attempted
    pub fn final_status(&self) -> DimseStatus {
        let SubOperationCounts {
            completed,
            failed,
            warning,
            ..
        } = self.counts;
        if failed == 0 && warning == 0 {
            DimseStatus::Success
        } else if completed + warning > 0 {
            DimseStatus::Warning(status::WARNING)
        } else {
            DimseStatus::Failure(status::UNABLE_TO_PERFORM_SUB_OPERATIONS)
        }
    }

    /// Final response after all sub-operations were attempted
    pub fn finish(mut self) -> DimseResponse {
        self.advance(RetrieveState::Completed);
        let response = DimseResponse::new(self.final_status()).with_counts(self.counts);
        if self.counts.failed > 0 {
            response.with_comment(format!("{} sub-operations failed", self.counts.failed))
        } else {
            response
        }
    }

    /// Final response when the transfer could not go on; counters stay as
    /// they were at the point of failure
    pub fn abort(mut self, reason: &TransferError) -> DimseResponse {
        self.advance(RetrieveState::Failed);
        DimseResponse::new(DimseStatus::unable_to_process())
            .with_counts(self.counts)
            .with_comment(reason.to_string())
    }

    pub fn cancel(self) -> DimseResponse {
        DimseResponse::cancel().with_counts(self.counts)
    }
}

/// How the transfer loop ended
enum TransferEnd {
    Done,
    Cancelled,
    /// Destination unreachable or association lost
    Lost(TransferError),
}

/// Requestor of the C-MOVE, stamped on every sub-operation
struct Originator {
    aet: String,
    message_id: Option<u16>,
}

/// Query/Retrieve MOVE SOP classes (C-MOVE)
pub struct RetrieveService {
    store: Arc<dyn ObjectStore>,
    directory: Arc<dyn AeDirectory>,
    associator: Arc<dyn OutboundAssociator>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RetrieveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieveService")
            .field("store", &self.store)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RetrieveService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        directory: Arc<dyn AeDirectory>,
        associator: Arc<dyn OutboundAssociator>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            associator,
            connect_timeout,
        }
    }

    async fn connect(
        &self,
        node: &RemoteNode,
    ) -> Result<Box<dyn OutboundAssociation>, TransferError> {
        let timeout = node
            .connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);
        match tokio::time::timeout(timeout, self.associator.connect(node)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Unreachable(format!(
                "{} did not answer within {:?}",
                node.address(),
                timeout
            ))),
        }
    }

    /// Matching instances in candidate order. `None` when cancelled.
    async fn collect_matches(
        &self,
        identifier: &AttributeSet,
        ctx: &RequestContext,
    ) -> Result<Option<Vec<StoredInstance>>, ServiceError> {
        let mut scan = candidates(&self.store, identifier).await?;
        let mut matches = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Ok(None),
                next = scan.next() => next,
            };
            match next {
                Some(candidate) => {
                    let candidate = candidate?;
                    if matching::matches(identifier, &candidate.attributes) {
                        matches.push(candidate);
                    }
                }
                None => return Ok(Some(matches)),
            }
        }
    }

    async fn transfer(
        &self,
        originator: &Originator,
        node: &RemoteNode,
        instances: Vec<StoredInstance>,
        mut outcome: RetrieveOutcome,
        ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError> {
        let mut association: Option<Box<dyn OutboundAssociation>> = None;
        let end = self
            .transfer_on(originator, node, instances, &mut outcome, &mut association, ctx)
            .await;
        if let Some(association) = association {
            association.release().await;
        }

        match end? {
            TransferEnd::Done => Ok(outcome.finish()),
            TransferEnd::Cancelled => {
                tracing::info!(
                    "C-MOVE cancelled with {} sub-operations remaining",
                    outcome.counts.remaining
                );
                Ok(outcome.cancel())
            }
            TransferEnd::Lost(err) => Ok(outcome.abort(&err)),
        }
    }

    async fn transfer_on(
        &self,
        originator: &Originator,
        node: &RemoteNode,
        instances: Vec<StoredInstance>,
        outcome: &mut RetrieveOutcome,
        association: &mut Option<Box<dyn OutboundAssociation>>,
        ctx: &RequestContext,
    ) -> Result<TransferEnd, ServiceError> {
        for instance in instances {
            if ctx.is_cancelled() {
                return Ok(TransferEnd::Cancelled);
            }

            let payload = match self.store.get(&instance.sop_instance_uid).await {
                Ok(Some((_, payload))) => Some(payload),
                Ok(None) => {
                    tracing::warn!("{} disappeared before transfer", instance.sop_instance_uid);
                    None
                }
                Err(err) => {
                    tracing::warn!("Failed to read {}: {}", instance.sop_instance_uid, err);
                    None
                }
            };

            if let Some(payload) = payload {
                if association.is_none() {
                    let connected = tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return Ok(TransferEnd::Cancelled),
                        connected = self.connect(node) => connected,
                    };
                    match connected {
                        Ok(open) => *association = Some(open),
                        Err(err) => {
                            tracing::error!(
                                "Cannot reach move destination {}: {}",
                                node.ae_title,
                                err
                            );
                            return Ok(TransferEnd::Lost(err));
                        }
                    }
                }
                let Some(open) = association.as_mut() else {
                    return Ok(TransferEnd::Cancelled);
                };

                let operation = StoreSubOperation {
                    sop_class_uid: instance.sop_class_uid.clone(),
                    sop_instance_uid: instance.sop_instance_uid.clone(),
                    payload,
                    move_originator_aet: originator.aet.clone(),
                    move_originator_message_id: originator.message_id,
                };
                match open.store(operation).await {
                    Ok(SubOperationOutcome::Completed) => outcome.completed(),
                    Ok(SubOperationOutcome::Warning(code)) => {
                        tracing::warn!(
                            "{} stored on {} with warning 0x{:04X}",
                            instance.sop_instance_uid,
                            node.ae_title,
                            code
                        );
                        outcome.warned();
                    }
                    Err(err) if err.is_fatal() => {
                        tracing::error!(
                            "Association to {} lost during {}: {}",
                            node.ae_title,
                            instance.sop_instance_uid,
                            err
                        );
                        outcome.failed();
                        // The association is gone, there is nothing to release
                        *association = None;
                        return Ok(TransferEnd::Lost(err));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "Sub-operation for {} failed: {}",
                            instance.sop_instance_uid,
                            err
                        );
                        outcome.failed();
                    }
                }
            } else {
                outcome.failed();
            }

            if !ctx
                .send_pending(DimseResponse::move_progress(outcome.counts))
                .await?
            {
                return Ok(TransferEnd::Cancelled);
            }
        }
        Ok(TransferEnd::Done)
    }
}

#[async_trait]
impl DimseService for RetrieveService {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    fn commands(&self) -> &'static [DimseCommand] {
        &[DimseCommand::Move]
    }

    async fn handle(
        &self,
        mut request: DimseRequest,
        ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError> {
        let mut outcome = RetrieveOutcome::new();

        let destination = request
            .command
            .required(tags::MOVE_DESTINATION)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::MoveDestinationUnknown(String::new()))?;
        let node = self
            .directory
            .resolve(&destination)
            .await
            .ok_or_else(|| ServiceError::MoveDestinationUnknown(destination.clone()))?;

        outcome.advance(RetrieveState::Matching);
        let identifier = read_identifier(&mut request).await?;
        let Some(instances) = self.collect_matches(&identifier, ctx).await? else {
            return Ok(outcome.cancel());
        };

        tracing::info!(
            "📤 C-MOVE from {} to {} ({}): {} instances",
            request.peer,
            destination,
            node.address(),
            instances.len()
        );
        outcome.matched(instances.len() as u32);
        if instances.is_empty() {
            return Ok(outcome.finish());
        }

        let originator = Originator {
            aet: request.peer.calling_aet.clone(),
            message_id: request.message_id(),
        };
        self.transfer(&originator, &node, instances, outcome, ctx)
            .await
    }
}
