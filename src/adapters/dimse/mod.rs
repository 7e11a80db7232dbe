pub mod status_mapper;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dicom_dictionary_std::tags;
use dimse::{DimseCommand, DimseRequest, DimseResponse, DimseStatus, ResponseSender};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::{RequestContext, ServiceRegistry};

/// Bounded worker pool the transport layer hands to the core
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    permits: Arc<Semaphore>,
    handle: Handle,
}

impl ExecutionContext {
    pub fn new(max_workers: usize, handle: Handle) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            handle,
        }
    }

    /// Pool on the runtime the caller is running on
    pub fn current(max_workers: usize) -> Self {
        Self::new(max_workers, Handle::current())
    }

    /// Workers that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Key of an in-flight request: calling AE title and Message ID
type InFlightKey = (String, u16);

/// Request ID and cancellation token of whichever request holds a key
type InFlightMap = HashMap<InFlightKey, (Uuid, CancellationToken)>;

/// Drop the entry for `key` if it still belongs to `request_id`. A peer may
/// reuse a Message ID once its response is sent, so a later request can hold
/// the key by the time an earlier one finishes.
fn release(in_flight: &Mutex<InFlightMap>, key: &InFlightKey, request_id: Uuid) {
    let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if guard.get(key).is_some_and(|(id, _)| *id == request_id) {
        guard.remove(key);
    }
}

/// DIMSE protocol adapter
///
/// Runs each request on its own worker from the execution context and
/// invokes the service registry. A failing or panicking request only ever
/// affects its own response stream.
pub struct DimseAdapter {
    registry: Arc<ServiceRegistry>,
    context: ExecutionContext,
    in_flight: Arc<Mutex<InFlightMap>>,
}

impl DimseAdapter {
    pub fn new(registry: Arc<ServiceRegistry>, context: ExecutionContext) -> Self {
        Self {
            registry,
            context,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Requests currently executing or waiting for a worker
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Cancel the request `message_id` of `calling_aet`. Returns whether it
    /// was still running.
    pub fn cancel(&self, calling_aet: &str, message_id: u16) -> bool {
        let guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(&(calling_aet.to_string(), message_id)) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Submit a request. `cancel` is the transport's cancellation signal for
    /// the association (abort or release); the responses end with the final
    /// one, whose status the returned handle resolves to.
    ///
    /// A C-CANCEL cancels the matching in-flight request and produces no
    /// response of its own.
    pub fn submit(
        &self,
        request: DimseRequest,
        responses: ResponseSender,
        cancel: CancellationToken,
    ) -> JoinHandle<DimseStatus> {
        if matches!(request.command_type(), Ok(DimseCommand::Cancel)) {
            let target = request
                .command
                .value(tags::MESSAGE_ID_BEING_RESPONDED_TO)
                .and_then(|v| v.parse::<u16>().ok());
            let found = target
                .map(|id| self.cancel(&request.peer.calling_aet, id))
                .unwrap_or(false);
            tracing::info!(
                "C-CANCEL from {} for message {:?} ({})",
                request.peer,
                target,
                if found { "cancelled" } else { "not running" }
            );
            return self.context.handle.spawn(async { DimseStatus::Cancel });
        }

        let token = cancel.child_token();
        let key = request
            .message_id()
            .map(|id| (request.peer.calling_aet.clone(), id));
        if let Some(key) = &key {
            self.in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key.clone(), (request.id, token.clone()));
        }

        let registry = self.registry.clone();
        let permits = self.context.permits.clone();
        let runtime = self.context.handle.clone();
        let in_flight = self.in_flight.clone();
        let request_id = request.id;

        self.context.handle.spawn(async move {
            let ctx = RequestContext::new(responses.clone(), token);

            let status = match permits.acquire_owned().await {
                Ok(permit) => {
                    let worker_ctx = ctx.clone();
                    let worker = runtime.spawn(async move {
                        let _permit = permit;
                        registry.dispatch(request, &worker_ctx).await
                    });
                    match worker.await {
                        Ok(status) => status,
                        Err(err) => {
                            tracing::error!("Worker for request {} failed: {}", request_id, err);
                            let response = DimseResponse::new(DimseStatus::processing_failure())
                                .with_comment("Internal error");
                            let _ = responses.send(response).await;
                            DimseStatus::processing_failure()
                        }
                    }
                }
                Err(_) => {
                    tracing::error!("Worker pool closed, rejecting request {}", request_id);
                    let response = DimseResponse::new(DimseStatus::processing_failure())
                        .with_comment("Worker pool closed");
                    let _ = responses.send(response).await;
                    DimseStatus::processing_failure()
                }
            };

            if let Some(key) = key {
                release(&in_flight, &key, request_id);
            }
            if status_mapper::is_successful_status(&status) {
                tracing::debug!("Request {} finished with {}", request_id, status);
            } else {
                tracing::info!("Request {} finished with {}", request_id, status);
            }
            status
        })
    }
}

impl std::fmt::Debug for DimseAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimseAdapter")
            .field("registry", &self.registry)
            .field("available_workers", &self.context.available())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
