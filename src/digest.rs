//! SHA-256 digest of a slot byte range.

use heapless::String;
use sha2::{Digest, Sha256};

use crate::entity::BootSlot;
use crate::error::UpdateError;
use crate::manifest::DIGEST_HEX_LEN;
use crate::slots::SlotStorage;

const DIGEST_CHUNK_SIZE: usize = 4096;

/// Digest exactly the first `len` bytes of a slot, rendered as lowercase hex.
///
/// The range is read back from flash in [`DIGEST_CHUNK_SIZE`] chunks, so the
/// result describes what the device will actually boot, not what was sent.
#[allow(clippy::cast_possible_truncation)]
pub async fn slot_digest_hex<S: SlotStorage>(
    slots: &mut S,
    slot: BootSlot,
    len: u32,
) -> Result<String<DIGEST_HEX_LEN>, UpdateError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; DIGEST_CHUNK_SIZE];
    let mut offset = 0u32;

    while offset < len {
        let take = (len - offset).min(DIGEST_CHUNK_SIZE as u32) as usize;
        slots.read(slot, offset, &mut buf[..take]).await?;
        hasher.update(&buf[..take]);
        offset += take as u32;
    }

    Ok(hex_encode(&hasher.finalize()))
}

/// Digest equality as published manifests use it: hex, either case.
pub fn digest_matches(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn hex_encode(bytes: &[u8]) -> String<DIGEST_HEX_LEN> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::new();
    for &byte in bytes {
        let _ = out.push(HEX[usize::from(byte >> 4)] as char);
        let _ = out.push(HEX[usize::from(byte & 0x0f)] as char);
    }
    out
}
