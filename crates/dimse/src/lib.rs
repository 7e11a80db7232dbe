//! DIMSE (DICOM Message Service Element) vocabulary
//!
//! This crate holds everything a Service Class Provider core shares with the
//! transport layer that carries its messages: attribute sets, commands and
//! status codes, request/response envelopes and the collaborator interfaces
//! the core calls out to (dataset receipt, outbound associations, AE title
//! resolution).
//!
//! # Features
//! - Tag-ordered `AttributeSet` with a bridge to `dicom-object`
//! - Named DIMSE status codes for C-ECHO, C-STORE, C-FIND and C-MOVE
//! - Streaming response channel for Pending semantics
//! - Async traits for the lower-layer collaborators

pub mod config;
pub mod error;
pub mod router;
pub mod scu;
pub mod types;

// Re-export commonly used types
pub use config::{AeDirectory, DimseConfig, RemoteNode};
pub use error::{DimseError, Result};
pub use router::{
    response_channel, DatasetReader, DimseRequest, DimseResponse, PeerIdentity,
    ReceivedDataset, ResponseSender, ResponseStream,
};
pub use scu::{
    OutboundAssociation, OutboundAssociator, StoreSubOperation, SubOperationOutcome, TransferError,
};
pub use types::{
    status, Attribute, AttributeSet, DimseCommand, DimseStatus, QueryLevel, SubOperationCounts,
};
