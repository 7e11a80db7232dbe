//! DIMSE Status Code Mapping
//!
//! Converts request-scoped service errors into the DICOM status codes sent
//! back to the peer (PS3.4 Annex C, PS3.7 Annex C).
//!
//! # Status Code Mapping
//!
//! - `0x0115`: Invalid argument value (malformed or missing command elements)
//! - `0x0110`: Processing failure (store or dataset I/O)
//! - `0x0122`: SOP class not supported
//! - `0x0211`: Unrecognized operation
//! - `0xA801`: Move destination unknown
//!
//! # Usage
//!
//! ```ignore
//! use crate::adapters::dimse::status_mapper;
//!
//! let error = ServiceError::MoveDestinationUnknown("NOWHERE".to_string());
//! let response = status_mapper::failure_response(&error);
//! assert_eq!(response.status, DimseStatus::Failure(0xA801));
//! ```

use dimse::{status, DimseResponse, DimseStatus};

use crate::services::ServiceError;

/// Longest Error Comment (0000,0902) sent; the element is LO
const MAX_ERROR_COMMENT: usize = 64;

/// Maps a service error to its DIMSE status
pub fn service_error_to_dimse(error: &ServiceError) -> DimseStatus {
    match error {
        ServiceError::Validation(_) => DimseStatus::Failure(status::INVALID_ARGUMENT_VALUE),
        ServiceError::Storage(_) | ServiceError::DatasetRead(_) => {
            DimseStatus::Failure(status::PROCESSING_FAILURE)
        }
        ServiceError::UnsupportedSopClass(_) => {
            DimseStatus::Failure(status::UNSUPPORTED_SOP_CLASS)
        }
        ServiceError::UnsupportedOperation { .. } => {
            DimseStatus::Failure(status::UNRECOGNIZED_OPERATION)
        }
        ServiceError::MoveDestinationUnknown(_) => {
            DimseStatus::Failure(status::MOVE_DESTINATION_UNKNOWN)
        }
        ServiceError::ResponseChannelClosed => DimseStatus::Failure(status::PROCESSING_FAILURE),
    }
}

/// Error comment text for a service error, cut to fit an LO element
pub fn error_comment(error: &ServiceError) -> String {
    let text = error.to_string();
    match text.char_indices().nth(MAX_ERROR_COMMENT) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

/// Final response reporting a service error
pub fn failure_response(error: &ServiceError) -> DimseResponse {
    DimseResponse::new(service_error_to_dimse(error)).with_comment(error_comment(error))
}

/// Check if a status indicates success (including warnings)
pub fn is_successful_status(status: &DimseStatus) -> bool {
    matches!(status, DimseStatus::Success | DimseStatus::Warning(_))
}
