//! Request and response envelopes exchanged between the transport layer and
//! the service provider core

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use dicom_dictionary_std::tags;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{AttributeSet, DimseCommand, DimseStatus, SubOperationCounts};
use crate::{DimseError, Result};

/// Association context of the requesting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// AE title the peer presented as its own
    pub calling_aet: String,

    /// AE title the peer addressed
    pub called_aet: String,

    /// Socket address of the peer, if the transport knows it
    pub peer_addr: Option<SocketAddr>,
}

impl PeerIdentity {
    pub fn new(calling_aet: impl Into<String>, called_aet: impl Into<String>) -> Self {
        Self {
            calling_aet: calling_aet.into(),
            called_aet: called_aet.into(),
            peer_addr: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer_addr {
            Some(addr) => write!(f, "{}@{}", self.calling_aet, addr),
            None => write!(f, "{}", self.calling_aet),
        }
    }
}

/// Dataset received with a request, fully materialized
#[derive(Debug, Clone)]
pub struct ReceivedDataset {
    /// Decoded attributes of the dataset
    pub attributes: AttributeSet,

    /// Encoded dataset bytes as received, persisted verbatim by storage
    pub payload: Bytes,
}

/// Inbound dataset stream supplied by the transport layer.
///
/// `Network` errors stand for a failed read from the association and
/// `DicomParsing` errors for a dataset that could not be decoded.
#[async_trait]
pub trait DatasetReader: Send {
    async fn read_dataset(&mut self) -> Result<ReceivedDataset>;
}

/// Request handed to the service provider by the transport layer
pub struct DimseRequest {
    /// Unique request ID for correlation
    pub id: Uuid,

    /// Requesting peer
    pub peer: PeerIdentity,

    /// SOP Class UID of the presentation context the request arrived on
    pub sop_class_uid: String,

    /// Decoded command set
    pub command: AttributeSet,

    /// Dataset following the command, if the command announced one
    pub dataset: Option<Box<dyn DatasetReader>>,
}

impl DimseRequest {
    pub fn new(peer: PeerIdentity, sop_class_uid: impl Into<String>, command: AttributeSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            sop_class_uid: sop_class_uid.into(),
            command,
            dataset: None,
        }
    }

    pub fn with_dataset(mut self, reader: Box<dyn DatasetReader>) -> Self {
        self.dataset = Some(reader);
        self
    }

    /// DIMSE command named by the Command Field (0000,0100)
    pub fn command_type(&self) -> Result<DimseCommand> {
        let field = self
            .command
            .required(tags::COMMAND_FIELD)
            .ok_or_else(|| DimseError::MissingCommandElement("Command Field".to_string()))?;
        field
            .parse::<u16>()
            .ok()
            .and_then(DimseCommand::from_command_field)
            .ok_or_else(|| DimseError::parsing(format!("unknown Command Field {}", field)))
    }

    /// Message ID (0000,0110) of the request
    pub fn message_id(&self) -> Option<u16> {
        self.command
            .value(tags::MESSAGE_ID)
            .and_then(|v| v.parse().ok())
    }

    /// Take the dataset reader, leaving none behind
    pub fn take_dataset(&mut self) -> Option<Box<dyn DatasetReader>> {
        self.dataset.take()
    }
}

impl fmt::Debug for DimseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimseRequest")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("sop_class_uid", &self.sop_class_uid)
            .field("command", &self.command)
            .field("has_dataset", &self.dataset.is_some())
            .finish()
    }
}

/// Response emitted by a service
#[derive(Debug, Clone, PartialEq)]
pub struct DimseResponse {
    /// Status of the response
    pub status: DimseStatus,

    /// Identifier or other dataset carried by the response
    pub dataset: Option<AttributeSet>,

    /// Error Comment (0000,0902) text for failures
    pub error_comment: Option<String>,

    /// C-MOVE sub-operation counters
    pub sub_operations: Option<SubOperationCounts>,
}

impl DimseResponse {
    pub fn new(status: DimseStatus) -> Self {
        Self {
            status,
            dataset: None,
            error_comment: None,
            sub_operations: None,
        }
    }

    pub fn success() -> Self {
        Self::new(DimseStatus::Success)
    }

    /// Pending response carrying one match
    pub fn pending(dataset: AttributeSet) -> Self {
        Self {
            dataset: Some(dataset),
            ..Self::new(DimseStatus::Pending)
        }
    }

    pub fn failure(code: u16, comment: impl Into<String>) -> Self {
        Self {
            error_comment: Some(comment.into()),
            ..Self::new(DimseStatus::Failure(code))
        }
    }

    pub fn cancel() -> Self {
        Self::new(DimseStatus::Cancel)
    }

    /// Pending C-MOVE response with the current counters
    pub fn move_progress(counts: SubOperationCounts) -> Self {
        Self::new(DimseStatus::Pending).with_counts(counts)
    }

    pub fn with_counts(mut self, counts: SubOperationCounts) -> Self {
        self.sub_operations = Some(counts);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.error_comment = Some(comment.into());
        self
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Response command set the encoding layer sends for this response
    pub fn command_set(&self, request: &DimseRequest) -> AttributeSet {
        use dicom_core::VR;

        let mut command = AttributeSet::new().with(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            request
                .command
                .value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or(request.sop_class_uid.as_str()),
        );
        if let Ok(field) = request.command_type().map(DimseCommand::response_field) {
            command.put(tags::COMMAND_FIELD, VR::US, field.to_string());
        }
        if let Some(uid) = request.command.required(tags::AFFECTED_SOP_INSTANCE_UID) {
            command.put(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, uid);
        }
        if let Some(id) = request.message_id() {
            command.put(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, id.to_string());
        }
        let data_set_type = if self.dataset.is_some() { 0x0000 } else { 0x0101 };
        command.put(tags::COMMAND_DATA_SET_TYPE, VR::US, data_set_type.to_string());
        command.put(tags::STATUS, VR::US, self.status.code().to_string());
        if let Some(comment) = &self.error_comment {
            command.put(tags::ERROR_COMMENT, VR::LO, comment.as_str());
        }
        if let Some(counts) = &self.sub_operations {
            counts.write_to(&mut command);
        }
        command
    }
}

/// Sending half of a per-request response channel
#[derive(Debug, Clone)]
pub struct ResponseSender {
    tx: mpsc::Sender<DimseResponse>,
}

/// Stream of responses for one request, ending after the final response
pub type ResponseStream = BoxStream<'static, DimseResponse>;

impl ResponseSender {
    /// Send a response, failing if the transport dropped the stream
    pub async fn send(&self, response: DimseResponse) -> Result<()> {
        self.tx.send(response).await.map_err(|err| {
            tracing::debug!("Response stream closed, dropping {} response", err.0.status);
            DimseError::router("Response stream closed")
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a response channel with the given buffer size
pub fn response_channel(buffer: usize) -> (ResponseSender, ResponseStream) {
    let (tx, mut rx) = mpsc::channel(buffer);

    let stream = async_stream::stream! {
        while let Some(response) = rx.recv().await {
            let is_final = DimseResponse::is_final(&response);
            yield response;
            if is_final {
                break;
            }
        }
    };

    (ResponseSender { tx }, Box::pin(stream))
}
