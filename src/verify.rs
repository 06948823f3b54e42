//! Post-transfer integrity verdict on the standby slot.

use log::{error, info, warn};

use crate::digest::{digest_matches, slot_digest_hex};
use crate::entity::BootSlot;
use crate::error::{IntegrityError, UpdateError};
use crate::slots::SlotStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The flashed bytes match the manifest digest.
    Verified,
    /// The manifest published no digest; the image is taken on trust.
    SkippedNoDigest,
}

/// Check the first `len` bytes of `slot` against the manifest digest.
///
/// `len` is the byte count the transfer actually wrote. An empty
/// `expected_digest` skips the check; that is legal but worth a warning,
/// because nothing then ties the flashed image to the release.
pub async fn verify_slot<S: SlotStorage>(
    slots: &mut S,
    slot: BootSlot,
    len: u32,
    expected_digest: &str,
) -> Result<VerifyOutcome, UpdateError> {
    if expected_digest.is_empty() {
        warn!("verify: manifest has no digest, skipping verification");
        return Ok(VerifyOutcome::SkippedNoDigest);
    }

    let computed = slot_digest_hex(slots, slot, len).await?;
    if !digest_matches(&computed, expected_digest) {
        error!("verify: digest mismatch, expected {expected_digest}, computed {computed}");
        return Err(IntegrityError::DigestMismatch.into());
    }

    info!("verify: image digest verified over {len} bytes");
    Ok(VerifyOutcome::Verified)
}
