use crate::entity::SourceId;
use crate::session::UpdateSession;

/// Default ceiling for a whole download-and-verify run.
pub const DEFAULT_TIMEOUT_MS: u32 = 120_000;

/// Per-attempt ceiling for fetching the release manifest.
pub const MANIFEST_TIMEOUT_MS: u32 = 10_000;

/// Grace period between a completed update and the automatic restart,
/// so the firmware can flush logs and report completion.
pub const REBOOT_DELAY_MS: u32 = 3_000;

/// Grace period before a rollback restart, for the same reason.
pub const ROLLBACK_DRAIN_MS: u32 = 5_000;

/// Largest manifest document the resolver accepts.
pub const MANIFEST_BUFFER_SIZE: usize = 2048;

/// Progress observer invoked from the transfer loop.
pub type ProgressCallback = fn(&UpdateSession);

/// Manifest and image locations of one distribution endpoint.
#[derive(Debug, Clone, Copy)]
pub struct SourceEndpoint {
    pub manifest_url: &'static str,
    pub firmware_url: &'static str,
}

/// The two release mirrors the device knows about.
#[derive(Debug, Clone, Copy)]
pub struct SourceEndpoints {
    pub primary: SourceEndpoint,
    pub secondary: SourceEndpoint,
}

impl SourceEndpoints {
    pub const fn get(&self, id: SourceId) -> SourceEndpoint {
        match id {
            SourceId::Primary => self.primary,
            SourceId::Secondary => self.secondary,
        }
    }
}

/// Per-call update settings.
///
/// The value is copied when an operation starts and never consulted again,
/// so changing a config between calls cannot affect a running session.
#[derive(Clone, Copy)]
pub struct UpdateConfig {
    /// Fetch the manifest from this URL instead of the resolved endpoint.
    /// An explicit URL also disables source failover for that check.
    pub manifest_url: Option<&'static str>,
    /// Download the image from this URL instead of the resolved endpoint.
    pub firmware_url: Option<&'static str>,
    /// Restart the device automatically after a completed update.
    pub auto_reboot: bool,
    /// Ceiling for the download-and-verify phase, in milliseconds.
    pub timeout_ms: u32,
    /// Flash whatever the endpoint serves without consulting the manifest.
    /// No digest is known in this mode, so verification is skipped.
    pub skip_version_check: bool,
    pub progress_callback: Option<ProgressCallback>,
}

impl UpdateConfig {
    pub const fn new() -> Self {
        Self {
            manifest_url: None,
            firmware_url: None,
            auto_reboot: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            skip_version_check: false,
            progress_callback: None,
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::new()
    }
}
