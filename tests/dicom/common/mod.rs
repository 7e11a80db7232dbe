#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dicom_core::VR;
use dicom_dictionary_std::{tags, uids};
use dimse::{
    response_channel, AttributeSet, DatasetReader, DimseCommand, DimseRequest, DimseResponse,
    DimseStatus, OutboundAssociation, OutboundAssociator, PeerIdentity, ReceivedDataset,
    RemoteNode, StoreSubOperation, SubOperationOutcome, TransferError,
};
use futures_util::StreamExt;
use pacs_scp::adapters::DimseAdapter;
use pacs_scp::config::Config;
use pacs_scp::storage::StorageConfig;
use pacs_scp::ScpCore;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const DESTINATION: &str = "WORKSTATION";
pub const CALLING_AET: &str = "MODALITY";

/// Dataset reader over an in-memory attribute set
pub struct MemoryDataset(pub Option<AttributeSet>);

#[async_trait]
impl DatasetReader for MemoryDataset {
    async fn read_dataset(&mut self) -> dimse::Result<ReceivedDataset> {
        let attributes = self
            .0
            .take()
            .ok_or_else(|| dimse::DimseError::parsing("dataset already read"))?;
        let payload = Bytes::from(format!("DICM{}", attributes));
        Ok(ReceivedDataset {
            attributes,
            payload,
        })
    }
}

/// Outbound associator whose sub-operation results follow a script
#[derive(Clone, Default)]
pub struct ScriptedAssociator {
    script: Arc<Mutex<VecDeque<Result<SubOperationOutcome, TransferError>>>>,
    refuse: bool,
    cancel_after: Option<(usize, CancellationToken)>,
    pub sent: Arc<Mutex<Vec<StoreSubOperation>>>,
    pub connects: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl ScriptedAssociator {
    pub fn new(script: Vec<Result<SubOperationOutcome, TransferError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Default::default()
        }
    }

    /// Associator whose destination never accepts the association
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    /// Cancel `token` once `count` sub-operations have been sent
    pub fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    pub fn sent_uids(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|op| op.sop_instance_uid.clone())
            .collect()
    }
}

struct ScriptedAssociation(ScriptedAssociator);

#[async_trait]
impl OutboundAssociator for ScriptedAssociator {
    async fn connect(
        &self,
        node: &RemoteNode,
    ) -> Result<Box<dyn OutboundAssociation>, TransferError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(TransferError::Unreachable(format!(
                "{} refused the association",
                node.address()
            )));
        }
        Ok(Box::new(ScriptedAssociation(self.clone())))
    }
}

#[async_trait]
impl OutboundAssociation for ScriptedAssociation {
    async fn store(
        &mut self,
        operation: StoreSubOperation,
    ) -> Result<SubOperationOutcome, TransferError> {
        let sent = {
            let mut sent = self.0.sent.lock().unwrap();
            sent.push(operation);
            sent.len()
        };
        if let Some((count, token)) = &self.0.cancel_after {
            if sent == *count {
                token.cancel();
            }
        }
        self.0
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SubOperationOutcome::Completed))
    }

    async fn release(self: Box<Self>) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(dir: &TempDir) -> Config {
    let mut options = HashMap::new();
    options.insert(
        "path".to_string(),
        serde_json::Value::String(dir.path().to_string_lossy().into_owned()),
    );
    let mut ae_titles = HashMap::new();
    ae_titles.insert(
        DESTINATION.to_string(),
        RemoteNode::new(DESTINATION, "127.0.0.1", 11113),
    );

    Config {
        storage: StorageConfig {
            backend: "filesystem".to_string(),
            options,
        },
        ae_titles,
        ..Default::default()
    }
}

pub fn core(dir: &TempDir, associator: ScriptedAssociator) -> ScpCore {
    ScpCore::from_config(config(dir), Arc::new(associator)).unwrap()
}

fn peer() -> PeerIdentity {
    PeerIdentity::new(CALLING_AET, "PACS_SCP").with_addr("127.0.0.1:50000".parse().unwrap())
}

pub fn ct_instance(sop_instance_uid: &str, patient_id: &str, modality: &str) -> AttributeSet {
    AttributeSet::new()
        .with(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE)
        .with(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid)
        .with(tags::PATIENT_ID, VR::LO, patient_id)
        .with(tags::PATIENT_NAME, VR::PN, "DOE^JANE")
        .with(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.826.0.1.1")
        .with(tags::MODALITY, VR::CS, modality)
}

pub fn store_request(
    sop_class_uid: &str,
    sop_instance_uid: Option<&str>,
    dataset: AttributeSet,
) -> DimseRequest {
    let mut command = DimseCommand::Store.command_set(1, sop_class_uid);
    if let Some(uid) = sop_instance_uid {
        command.put(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, uid);
    }
    DimseRequest::new(peer(), sop_class_uid, command)
        .with_dataset(Box::new(MemoryDataset(Some(dataset))))
}

pub fn find_request(identifier: AttributeSet) -> DimseRequest {
    let sop_class = uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND;
    DimseRequest::new(peer(), sop_class, DimseCommand::Find.command_set(3, sop_class))
        .with_dataset(Box::new(MemoryDataset(Some(identifier))))
}

pub fn move_request(destination: &str, identifier: AttributeSet) -> DimseRequest {
    let sop_class = uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE;
    let command = DimseCommand::Move
        .command_set(9, sop_class)
        .with(tags::MOVE_DESTINATION, VR::AE, destination);
    DimseRequest::new(peer(), sop_class, command)
        .with_dataset(Box::new(MemoryDataset(Some(identifier))))
}

/// Submit a request and collect every response up to the final one
pub async fn run(adapter: &DimseAdapter, request: DimseRequest) -> Vec<DimseResponse> {
    run_with(adapter, request, CancellationToken::new()).await
}

pub async fn run_with(
    adapter: &DimseAdapter,
    request: DimseRequest,
    cancel: CancellationToken,
) -> Vec<DimseResponse> {
    let (tx, stream) = response_channel(64);
    let handle = adapter.submit(request, tx, cancel);
    let responses: Vec<DimseResponse> = stream.collect().await;
    let status = handle.await.unwrap();
    assert_eq!(responses.last().map(|r| r.status), Some(status));
    responses
}

/// Store each dataset through the adapter, asserting success
pub async fn store_all(adapter: &DimseAdapter, datasets: Vec<AttributeSet>) {
    for dataset in datasets {
        let uid = dataset.value(tags::SOP_INSTANCE_UID).unwrap().to_string();
        let responses = run(
            adapter,
            store_request(uids::CT_IMAGE_STORAGE, Some(&uid), dataset),
        )
        .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, DimseStatus::Success);
    }
}
