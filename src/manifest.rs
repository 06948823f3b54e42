//! Release manifest parsing and firmware identity.
//!
//! A release is described by a small JSON document published next to the
//! image:
//!
//! ```json
//! {
//!     "version": "v2.6.3",
//!     "build_date": "2025-11-07",
//!     "size_bytes": 1300000,
//!     "sha256": "9f86d081884c7d65..."
//! }
//! ```
//!
//! Only `version` is mandatory. A manifest without `sha256` is accepted, but
//! the flashed image then cannot be verified and the pipeline says so loudly.

use heapless::String;
use serde::Deserialize;

use crate::entity::BootSlot;
use crate::error::StructuralError;

/// Length of a rendered SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Length of the abbreviated digest used for identity comparison.
pub const SHORT_HASH_LEN: usize = 8;

#[derive(Deserialize)]
struct ManifestDoc {
    version: String<32>,
    #[serde(default)]
    build_date: String<16>,
    #[serde(default)]
    size_bytes: u32,
    #[serde(default)]
    sha256: Option<String<DIGEST_HEX_LEN>>,
}

/// Parsed description of a published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareManifest {
    pub version: String<32>,
    pub build_date: String<16>,
    pub size_bytes: u32,
    /// Lowercase or uppercase hex digest of the image file; empty when the
    /// manifest does not publish one.
    pub digest_hex: String<DIGEST_HEX_LEN>,
    /// First eight digest characters, the release's identity.
    pub short_hash: String<SHORT_HASH_LEN>,
}

impl FirmwareManifest {
    /// Parse a manifest document.
    ///
    /// A present but malformed digest (wrong length or non-hex characters)
    /// rejects the whole document; a digest that is merely absent does not.
    pub fn from_json(bytes: &[u8]) -> Result<Self, StructuralError> {
        let (doc, _) = serde_json_core::from_slice::<ManifestDoc>(bytes)
            .map_err(|_| StructuralError::BadManifest)?;

        let digest_hex = match doc.sha256 {
            Some(digest) => {
                if digest.len() != DIGEST_HEX_LEN
                    || !digest.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(StructuralError::BadManifest);
                }
                digest
            }
            None => String::new(),
        };

        Ok(Self {
            version: doc.version,
            build_date: doc.build_date,
            size_bytes: doc.size_bytes,
            short_hash: short_hash_of(&digest_hex),
            digest_hex,
        })
    }

    pub fn has_digest(&self) -> bool {
        !self.digest_hex.is_empty()
    }
}

/// Identity of the image the device is currently executing.
///
/// Same shape as a manifest, self-described from the running slot's
/// descriptor, plus where it runs. The digest fields stay empty when the
/// image length is unknown (factory firmware that never went through an
/// update) and comparison then falls back to version numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningFirmwareInfo {
    pub version: String<32>,
    pub build_date: String<16>,
    /// Platform SDK version the image was built against.
    pub platform_version: String<32>,
    pub size_bytes: u32,
    pub digest_hex: String<DIGEST_HEX_LEN>,
    pub short_hash: String<SHORT_HASH_LEN>,
    pub slot: BootSlot,
}

/// First [`SHORT_HASH_LEN`] characters of a digest; empty stays empty.
pub(crate) fn short_hash_of(digest: &str) -> String<SHORT_HASH_LEN> {
    let mut out = String::new();
    let cut = digest.len().min(SHORT_HASH_LEN);
    let _ = out.push_str(&digest[..cut]);
    out
}
