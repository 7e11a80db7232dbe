use std::collections::HashMap;
use std::sync::Arc;

use dicom_dictionary_std::{tags, uids};
use dimse::{
    AeDirectory, DimseConfig, DimseRequest, DimseStatus, OutboundAssociator,
};

use crate::adapters::dimse::status_mapper;
use crate::services::{
    DimseService, QueryService, RequestContext, RetrieveService, ServiceError, StorageService,
    VerificationService,
};
use crate::storage::ObjectStore;

/// Query/Retrieve information models served by the FIND and MOVE services
const FIND_SOP_CLASSES: [&str; 2] = [
    uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
    uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
];

const MOVE_SOP_CLASSES: [&str; 2] = [
    uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
    uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
];

/// Maps SOP Class UIDs to the service handling them.
///
/// Built once at startup and shared read-only by every worker.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn DimseService>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<_> = self
            .services
            .iter()
            .map(|(uid, service)| (uid.as_str(), service.name()))
            .collect();
        entries.sort();
        f.debug_struct("ServiceRegistry")
            .field("services", &entries)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` for a SOP class, replacing any previous entry
    pub fn register(&mut self, sop_class_uid: impl Into<String>, service: Arc<dyn DimseService>) {
        let sop_class_uid = sop_class_uid.into();
        tracing::debug!("Registering {} service for {}", service.name(), sop_class_uid);
        self.services.insert(sop_class_uid, service);
    }

    /// Registry with the standard services enabled in `config`
    pub fn standard(
        config: &DimseConfig,
        storage_sop_classes: &[String],
        store: Arc<dyn ObjectStore>,
        directory: Arc<dyn AeDirectory>,
        associator: Arc<dyn OutboundAssociator>,
    ) -> Self {
        let mut registry = Self::new();

        if config.enable_echo {
            registry.register(uids::VERIFICATION, Arc::new(VerificationService));
        }
        if config.enable_store {
            let storage: Arc<dyn DimseService> = Arc::new(StorageService::new(store.clone()));
            for sop_class_uid in storage_sop_classes {
                registry.register(sop_class_uid.as_str(), storage.clone());
            }
        }
        if config.enable_find {
            let query: Arc<dyn DimseService> = Arc::new(QueryService::new(store.clone()));
            for sop_class_uid in FIND_SOP_CLASSES {
                registry.register(sop_class_uid, query.clone());
            }
        }
        if config.enable_move {
            let retrieve: Arc<dyn DimseService> = Arc::new(RetrieveService::new(
                store,
                directory,
                associator,
                config.connect_timeout(),
            ));
            for sop_class_uid in MOVE_SOP_CLASSES {
                registry.register(sop_class_uid, retrieve.clone());
            }
        }

        tracing::info!("Service registry ready with {} SOP classes", registry.services.len());
        registry
    }

    pub fn resolve(&self, sop_class_uid: &str) -> Option<Arc<dyn DimseService>> {
        self.services.get(sop_class_uid).cloned()
    }

    /// Registered SOP Class UIDs, sorted
    pub fn sop_classes(&self) -> Vec<&str> {
        let mut uids: Vec<&str> = self.services.keys().map(String::as_str).collect();
        uids.sort_unstable();
        uids
    }

    /// Route a request to its service, send the final response and return
    /// its status. Every failure becomes a response; none escapes the request.
    pub async fn dispatch(&self, request: DimseRequest, ctx: &RequestContext) -> DimseStatus {
        let sop_class_uid = if request.sop_class_uid.is_empty() {
            request
                .command
                .value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or_default()
                .to_string()
        } else {
            request.sop_class_uid.clone()
        };
        let command = request.command_type();
        let request_id = request.id;

        let result = match (self.resolve(&sop_class_uid), command) {
            (None, _) => Err(ServiceError::UnsupportedSopClass(sop_class_uid.clone())),
            (Some(_), Err(err)) => Err(ServiceError::Validation(err.to_string())),
            (Some(service), Ok(command)) if service.commands().contains(&command) => {
                tracing::debug!(
                    "Dispatching {} {} to {} service",
                    command,
                    request_id,
                    service.name()
                );
                service.handle(request, ctx).await
            }
            (Some(_), Ok(command)) => Err(ServiceError::UnsupportedOperation {
                command: command.to_string(),
                sop_class_uid: sop_class_uid.clone(),
            }),
        };

        let response = match result {
            Ok(response) => response,
            Err(ServiceError::ResponseChannelClosed) => {
                tracing::warn!("Response stream of {} closed by the transport", request_id);
                return DimseStatus::processing_failure();
            }
            Err(err) => {
                let response = status_mapper::failure_response(&err);
                match &err {
                    ServiceError::Storage(_) | ServiceError::DatasetRead(_) => {
                        tracing::error!("Request {} failed: {}", request_id, err)
                    }
                    _ => tracing::warn!("Request {} rejected: {}", request_id, err),
                }
                response
            }
        };

        let status = response.status;
        if ctx.send(response).await.is_err() {
            tracing::warn!("Final response of {} could not be delivered", request_id);
        }
        status
    }
}
