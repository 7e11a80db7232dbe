//! Outbound association capability used for C-MOVE sub-operations
//!
//! The association engine itself lives in the transport layer. The provider
//! core only needs to open one association to a move destination, push
//! C-STORE sub-operations through it in order and release it afterwards.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::RemoteNode;

/// Failure of an outbound transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The destination could not be reached or refused the association
    #[error("Destination unreachable: {0}")]
    Unreachable(String),

    /// The association was lost while transferring
    #[error("Association lost: {0}")]
    AssociationLost(String),

    /// The destination answered the sub-operation with a failure status
    #[error("Sub-operation rejected with status 0x{0:04X}: {1}")]
    Rejected(u16, String),
}

impl TransferError {
    /// Whether the error ends every remaining sub-operation on the association
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransferError::Rejected(..))
    }
}

/// Successful result of one C-STORE sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOperationOutcome {
    /// Stored by the destination
    Completed,
    /// Stored with a warning status (e.g. coercion of data elements)
    Warning(u16),
}

/// One C-STORE sub-operation issued on behalf of a C-MOVE
#[derive(Debug, Clone)]
pub struct StoreSubOperation {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub payload: Bytes,

    /// Move Originator AE Title (0000,1030)
    pub move_originator_aet: String,

    /// Move Originator Message ID (0000,1031)
    pub move_originator_message_id: Option<u16>,
}

/// Opens associations to remote nodes
#[async_trait]
pub trait OutboundAssociator: Send + Sync {
    async fn connect(
        &self,
        node: &RemoteNode,
    ) -> std::result::Result<Box<dyn OutboundAssociation>, TransferError>;
}

/// An established outbound association
#[async_trait]
pub trait OutboundAssociation: Send {
    /// Perform one C-STORE sub-operation
    async fn store(
        &mut self,
        operation: StoreSubOperation,
    ) -> std::result::Result<SubOperationOutcome, TransferError>;

    /// Release the association
    async fn release(self: Box<Self>);
}
