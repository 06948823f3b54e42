//! Release distribution access and the manifest resolver.
//!
//! The engine never opens a socket itself. [`UpdateSource`] is the seam the
//! firmware implements on top of its HTTP stack; the resolver here owns the
//! policy: which mirror to ask first, when to fall back, and how long to
//! wait for an answer.

use embassy_futures::select::{Either, select};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Read;
use log::{info, warn};

use crate::config::{MANIFEST_BUFFER_SIZE, MANIFEST_TIMEOUT_MS, SourceEndpoints};
use crate::entity::SourceId;
use crate::error::{NetworkError, UpdateError};
use crate::manifest::{FirmwareManifest, RunningFirmwareInfo};
use crate::version::compare_versions;

/// Byte stream of a firmware image being downloaded.
pub trait FirmwareStream: Read {
    /// Transport length hint in bytes; 0 when the transport does not know.
    fn content_length(&self) -> u32;
}

/// Access to the release mirrors.
#[allow(async_fn_in_trait)]
pub trait UpdateSource {
    /// Fetch the manifest document at `url` into `buf`; returns its length.
    async fn fetch_manifest(&mut self, url: &str, buf: &mut [u8])
    -> Result<usize, NetworkError>;

    /// Open the image at `url` for streaming.
    async fn open_image(&mut self, url: &str) -> Result<impl FirmwareStream, NetworkError>;
}

/// Result of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// A different release is published.
    UpdateAvailable(FirmwareManifest),
    UpToDate,
}

/// Fetch and parse the release manifest, falling back to the other mirror.
///
/// Any failure of the first attempt counts: transport errors, timeouts,
/// empty bodies, and unparseable documents alike. An explicit `override_url`
/// pins the check to that location and disables the fallback; an operator
/// asking for a specific URL must not silently get another host. Returns the
/// manifest together with the source that served it, so the download can be
/// paired with the same mirror.
pub(crate) async fn resolve_manifest<U: UpdateSource, D: DelayNs>(
    source: &mut U,
    delay: &mut D,
    endpoints: &SourceEndpoints,
    preferred: SourceId,
    override_url: Option<&str>,
) -> Result<(FirmwareManifest, SourceId), UpdateError> {
    if let Some(url) = override_url {
        let manifest = fetch_one(source, delay, url).await?;
        return Ok((manifest, preferred));
    }

    match fetch_one(source, delay, endpoints.get(preferred).manifest_url).await {
        Ok(manifest) => Ok((manifest, preferred)),
        Err(error) => {
            let alternate = preferred.other();
            warn!(
                "resolver: {} source failed ({}), trying {}",
                preferred.as_str(),
                error.as_str(),
                alternate.as_str()
            );
            let manifest = fetch_one(source, delay, endpoints.get(alternate).manifest_url).await?;
            info!("resolver: {} source answered", alternate.as_str());
            Ok((manifest, alternate))
        }
    }
}

async fn fetch_one<U: UpdateSource, D: DelayNs>(
    source: &mut U,
    delay: &mut D,
    url: &str,
) -> Result<FirmwareManifest, UpdateError> {
    let mut buf = [0u8; MANIFEST_BUFFER_SIZE];
    let len = match select(
        source.fetch_manifest(url, &mut buf),
        delay.delay_ms(MANIFEST_TIMEOUT_MS),
    )
    .await
    {
        Either::First(result) => result?,
        Either::Second(()) => return Err(NetworkError::Timeout.into()),
    };

    if len == 0 {
        return Err(NetworkError::Empty.into());
    }
    Ok(FirmwareManifest::from_json(&buf[..len])?)
}

/// Decide whether `manifest` describes a release other than the running one.
///
/// When both sides carry a build identity, the identity alone decides; a
/// changed hash is an update even if the version string did not move, and
/// vice versa. Without identities the version numbers decide, and only a
/// strictly newer release counts.
pub fn is_update_available(running: &RunningFirmwareInfo, manifest: &FirmwareManifest) -> bool {
    if !running.short_hash.is_empty() && !manifest.short_hash.is_empty() {
        if running.short_hash.eq_ignore_ascii_case(&manifest.short_hash) {
            info!("resolver: build {} is current", running.short_hash);
            return false;
        }
        info!(
            "resolver: build differs, running {} published {}",
            running.short_hash, manifest.short_hash
        );
        return true;
    }

    match compare_versions(&running.version, &manifest.version) {
        core::cmp::Ordering::Less => {
            info!(
                "resolver: update available, {} -> {}",
                running.version, manifest.version
            );
            true
        }
        core::cmp::Ordering::Equal => {
            info!("resolver: version {} is current", running.version);
            false
        }
        core::cmp::Ordering::Greater => {
            warn!(
                "resolver: running {} is newer than published {}",
                running.version, manifest.version
            );
            false
        }
    }
}
