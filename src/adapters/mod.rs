//! Protocol adapters between the transport layer and the service core

pub mod dimse;

pub use self::dimse::{DimseAdapter, ExecutionContext};
