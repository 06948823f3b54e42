#![no_std]

//! # Firmware updates for two-slot embedded devices
//!
//! `myrtio-ota` drives over-the-air firmware updates on devices that keep
//! two application slots in flash: the new image streams into the standby
//! slot, is verified against the release manifest, and only then does the
//! boot sector flip. An image that fails to prove itself after the reboot
//! is rolled back automatically.
//!
//! Architecture layers:
//! - `slots` / `persist` / `platform` / `source` - Ports for flash, the boot
//!   sector, the persisted update record, system probes and the transport
//! - `manifest` / `version` / `digest` / `image` - Release identity: the
//!   published manifest, version ordering, SHA-256 digests and the
//!   descriptor embedded in every image
//! - `session` - Shared progress state for external observation
//! - `updater` - Main orchestrator ([`OtaManager`])
//! - `health` - Boot-loop breaker and post-update validation
//!
//! The engine is generic over its ports, so it runs against real flash on
//! the device and against in-memory doubles on the host. All timing goes
//! through an injected delay and restarts through an injected reset, which
//! keeps every code path drivable from a test.

pub mod config;
pub mod digest;
pub mod entity;
pub mod error;
pub mod health;
pub mod image;
pub mod manifest;
pub mod persist;
pub mod platform;
pub mod session;
pub mod slots;
pub mod source;
pub mod updater;
pub mod verify;
pub mod version;

mod boot;
mod transfer;

// Engine exports
pub use updater::{OtaManager, UpdateOutcome};

// Configuration exports
pub use config::{DEFAULT_TIMEOUT_MS, SourceEndpoint, SourceEndpoints, UpdateConfig};

// Session exports
pub use session::{SharedSession, UpdateSession, UpdateState};

// Entity exports
pub use entity::{BootSlot, SourceId};

// Error exports
pub use error::{
    IntegrityError, NetworkError, StateError, StorageError, StructuralError, UpdateError,
};

// Port exports
pub use persist::{StateStore, UpdateRecord};
pub use platform::{HealthProbes, SystemClock, SystemPort, SystemReset};
pub use slots::{BootSector, NorFlashSlots, SlotRegion, SlotStorage};
pub use source::{CheckOutcome, FirmwareStream, UpdateSource};

// Release exports
pub use manifest::{FirmwareManifest, RunningFirmwareInfo};

// Health exports
pub use health::ValidationOutcome;
