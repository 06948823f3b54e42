//! Application image descriptor.
//!
//! Every firmware image starts with a 256-byte descriptor that identifies the
//! build. The transfer pipeline refuses a stream whose descriptor magic does
//! not match before anything beyond the header reaches flash, and the health
//! supervisor re-reads the descriptor of the running slot as one of its
//! critical checks.

use bytemuck::{Pod, Zeroable};
use heapless::String;

/// Magic word every application descriptor starts with.
pub const APP_DESC_MAGIC_WORD: u32 = 0xABCD_5432;

/// Size of the descriptor at the front of every image.
pub const APP_DESC_SIZE: usize = 256;

/// Build metadata embedded at the front of an application image.
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
pub struct AppDescriptor {
    pub magic_word: u32,
    pub secure_version: u32,
    pub reserv1: [u32; 2],
    /// Application version, NUL-padded.
    pub version: [u8; 32],
    pub project_name: [u8; 32],
    /// Compile time, NUL-padded.
    pub time: [u8; 16],
    /// Compile date, NUL-padded.
    pub date: [u8; 16],
    /// Platform SDK version the image was built against.
    pub idf_ver: [u8; 32],
    pub app_elf_sha256: [u8; 32],
    pub reserv2: [u32; 20],
}

impl AppDescriptor {
    /// Read a descriptor from the front of an image buffer.
    ///
    /// Returns `None` when the buffer is shorter than a descriptor. The magic
    /// word is not checked here; callers decide how to treat a mismatch.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < APP_DESC_SIZE {
            return None;
        }
        bytemuck::try_pod_read_unaligned(&bytes[..APP_DESC_SIZE]).ok()
    }

    pub fn matches_magic(&self) -> bool {
        self.magic_word == APP_DESC_MAGIC_WORD
    }

    pub fn version_str(&self) -> String<32> {
        parse_padded_str(&self.version)
    }

    pub fn date_str(&self) -> String<16> {
        parse_padded_str(&self.date)
    }

    pub fn time_str(&self) -> String<16> {
        parse_padded_str(&self.time)
    }

    pub fn platform_str(&self) -> String<32> {
        parse_padded_str(&self.idf_ver)
    }
}

/// Extract a NUL-padded string field. Non-UTF-8 content yields an empty
/// string; descriptors read back from flash are not trusted to be well formed.
fn parse_padded_str<const N: usize>(bytes: &[u8]) -> String<N> {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut out = String::new();
    if let Ok(s) = core::str::from_utf8(&bytes[..len]) {
        let _ = out.push_str(s);
    }
    out
}
