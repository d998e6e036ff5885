use mixcoin_core::constants::FEE_BIPS_MAX;
use mixcoin_core::error::MixcoinError;
use mixcoin_core::types::{ChunkRequest, Height};

/// Validate a chunk request against the current height.
///
/// Rejection happens before any state is touched; a malformed request is
/// never partially processed. The fee rate is clamped rather than rejected.
pub fn validate_request(req: &mut ChunkRequest, height: Height) -> Result<(), MixcoinError> {
    if req.out_addr.is_empty() {
        return Err(MixcoinError::Validation("output address is empty".into()));
    }
    if bs58::decode(&req.out_addr).into_vec().is_err() {
        return Err(MixcoinError::Validation(
            "output address is not valid base58".into(),
        ));
    }
    if !req.escrow_addr.is_empty() {
        return Err(MixcoinError::Validation(
            "escrow address is assigned by the service".into(),
        ));
    }
    if req.fee_bips > FEE_BIPS_MAX {
        req.fee_bips = FEE_BIPS_MAX;
    }
    if req.return_by <= height {
        // Would reach the scheduler with no admissible delay window.
        return Err(MixcoinError::SchedulingInvariant {
            return_by: req.return_by,
            height,
        });
    }
    if req.send_by <= height {
        return Err(MixcoinError::Validation(format!(
            "send_by {} has already passed at height {}",
            req.send_by, height
        )));
    }
    if req.return_by <= req.send_by {
        return Err(MixcoinError::Validation(format!(
            "return_by {} must be after send_by {}",
            req.return_by, req.send_by
        )));
    }
    Ok(())
}
