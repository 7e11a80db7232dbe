use async_trait::async_trait;
use dimse::{DimseCommand, DimseRequest, DimseResponse};

use crate::services::{DimseService, RequestContext, ServiceError};

/// Verification SOP class (C-ECHO)
#[derive(Debug, Default)]
pub struct VerificationService;

#[async_trait]
impl DimseService for VerificationService {
    fn name(&self) -> &'static str {
        "verification"
    }

    fn commands(&self) -> &'static [DimseCommand] {
        &[DimseCommand::Echo]
    }

    async fn handle(
        &self,
        request: DimseRequest,
        _ctx: &RequestContext,
    ) -> Result<DimseResponse, ServiceError> {
        let peer_addr = request
            .peer
            .peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(
            "C-ECHO from '{}' at {} (called '{}')",
            request.peer.calling_aet,
            peer_addr,
            request.peer.called_aet
        );
        Ok(DimseResponse::success())
    }
}
