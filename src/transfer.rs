//! Streaming transfer of a firmware image into the standby slot.
//!
//! The image is consumed in chunks and written as it arrives; nothing is
//! buffered beyond one chunk and a partial flash word. The first 256 bytes
//! are held back until the application descriptor checks out, so a wrong
//! artifact is rejected before anything beyond the header reaches flash.

use log::{error, info};

use crate::entity::BootSlot;
use crate::error::{NetworkError, StructuralError, UpdateError};
use crate::image::{APP_DESC_SIZE, AppDescriptor};
use crate::session::SharedSession;
use crate::slots::SlotStorage;
use crate::source::FirmwareStream;

const TRANSFER_CHUNK_SIZE: usize = 1024;
const WRITE_ALIGN: usize = 4;

/// Progress callback fires every this many percent.
const CALLBACK_STEP: u8 = 5;
/// Progress log lines appear every this many percent.
const LOG_STEP: u8 = 10;

pub(crate) enum TransferOutcome {
    Complete { bytes: u32 },
    Cancelled,
}

/// Stream an image into `slot`.
///
/// `fallback_total` is the manifest size, used for progress when the
/// transport gives no length hint. Cancellation is honored between chunks;
/// a cancelled transfer leaves the slot partially written, which is fine
/// because the boot pointer still names the running slot.
#[allow(clippy::cast_possible_truncation)]
pub(crate) async fn run_transfer<S: SlotStorage, T: FirmwareStream>(
    slots: &mut S,
    slot: BootSlot,
    stream: &mut T,
    session: &SharedSession,
    fallback_total: u32,
) -> Result<TransferOutcome, UpdateError> {
    let hint = stream.content_length();
    let total = if hint > 0 { hint } else { fallback_total };
    session.set_total(total);

    let erase_len = if total > 0 { total } else { slots.capacity(slot) };
    info!("transfer: erasing {} for a {total} byte image", slot.as_str());
    slots.erase(slot, erase_len).await?;

    // Hold the descriptor back until it is validated.
    let mut desc_buf = [0u8; APP_DESC_SIZE];
    let mut desc_len = 0usize;
    while desc_len < APP_DESC_SIZE {
        let n = stream
            .read(&mut desc_buf[desc_len..])
            .await
            .map_err(|_| NetworkError::Unreachable)?;
        if n == 0 {
            error!("transfer: stream ended inside the image header");
            return Err(StructuralError::Truncated.into());
        }
        desc_len += n;
    }

    let descriptor = AppDescriptor::parse(&desc_buf).ok_or(StructuralError::Truncated)?;
    if !descriptor.matches_magic() {
        error!("transfer: image header magic mismatch, rejecting stream");
        return Err(StructuralError::BadMagic.into());
    }
    info!(
        "transfer: incoming firmware {} built {}",
        descriptor.version_str(),
        descriptor.date_str()
    );

    let mut written: u32 = 0;
    let mut received: u32 = 0;
    let mut tail = [0xFFu8; WRITE_ALIGN];
    let mut tail_len: usize = 0;

    write_aligned(slots, slot, &desc_buf, &mut written, &mut tail, &mut tail_len).await?;
    received += APP_DESC_SIZE as u32;

    let mut chunk = [0u8; TRANSFER_CHUNK_SIZE];
    let mut last_callback_percent: u8 = 0;
    let mut last_log_percent: u8 = 0;

    loop {
        if session.cancel_requested() {
            info!("transfer: cancelled after {received} bytes");
            return Ok(TransferOutcome::Cancelled);
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|_| NetworkError::Unreachable)?;
        if n == 0 {
            break;
        }

        write_aligned(slots, slot, &chunk[..n], &mut written, &mut tail, &mut tail_len).await?;
        received += n as u32;

        let percent = session.set_progress(received);
        if percent - last_callback_percent >= CALLBACK_STEP {
            last_callback_percent = percent;
            let (callback, snapshot) = session.progress_observer();
            if let Some(callback) = callback {
                callback(&snapshot);
            }
        }
        if percent - last_log_percent >= LOG_STEP {
            last_log_percent = percent;
            info!("transfer: {percent}% ({received}/{total} bytes)");
        }
    }

    // Flush the partial word, padded with erased-state bytes.
    if tail_len > 0 {
        slots.write(slot, written, &tail).await?;
    }

    if hint > 0 && received != hint {
        error!("transfer: stream ended early, {received} of {hint} bytes");
        return Err(NetworkError::Incomplete.into());
    }

    info!("transfer: received {received} bytes");
    Ok(TransferOutcome::Complete { bytes: received })
}

/// Write a chunk at the current position, keeping flash accesses aligned.
///
/// Flash writes must be whole 4-byte words at word offsets. A chunk first
/// completes any partial word carried over, then writes its aligned middle
/// in one go, then leaves its own stragglers in `tail` for the next call.
#[allow(clippy::cast_possible_truncation)]
async fn write_aligned<S: SlotStorage>(
    slots: &mut S,
    slot: BootSlot,
    data: &[u8],
    written: &mut u32,
    tail: &mut [u8; WRITE_ALIGN],
    tail_len: &mut usize,
) -> Result<(), UpdateError> {
    let mut idx = 0;

    // Complete partial word
    if *tail_len > 0 {
        let need = WRITE_ALIGN - *tail_len;
        let take = need.min(data.len());
        tail[*tail_len..*tail_len + take].copy_from_slice(&data[..take]);
        *tail_len += take;
        idx += take;

        if *tail_len == WRITE_ALIGN {
            slots.write(slot, *written, tail).await?;
            *written += WRITE_ALIGN as u32;
            *tail_len = 0;
            tail.fill(0xFF);
        }
    }

    // Write aligned bulk
    let rem = &data[idx..];
    let aligned_len = rem.len() & !(WRITE_ALIGN - 1);
    if aligned_len > 0 {
        slots.write(slot, *written, &rem[..aligned_len]).await?;
        *written += aligned_len as u32;
    }

    // Keep trailing bytes
    let spill = &rem[aligned_len..];
    if !spill.is_empty() {
        tail[..spill.len()].copy_from_slice(spill);
        *tail_len = spill.len();
    }

    Ok(())
}
