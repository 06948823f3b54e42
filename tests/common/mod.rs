//! Shared test doubles for exercising the update engine on the host.
//!
//! Every hardware port gets an in-memory stand-in backed by `Rc` handles,
//! so tests keep a view into flash, the boot pointer and the persisted
//! record after handing the parts to the engine. The fake delay completes
//! after a number of polls proportional to the requested time, which lets
//! timeout paths fire deterministically without real clocks.

#![allow(dead_code)]
#![allow(clippy::cast_possible_truncation)]

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytemuck::Zeroable;
use embedded_hal_async::delay::DelayNs;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use sha2::{Digest, Sha256};

use myrtio_ota::error::{NetworkError, StorageError};
use myrtio_ota::image::{APP_DESC_MAGIC_WORD, APP_DESC_SIZE, AppDescriptor};
use myrtio_ota::persist::RECORD_SIZE;
use myrtio_ota::{
    BootSector, BootSlot, FirmwareStream, NorFlashSlots, OtaManager, SharedSession, SlotRegion,
    SourceEndpoint, SourceEndpoints, StateStore, UpdateSource,
};
use myrtio_ota::{HealthProbes, SystemClock, SystemPort, SystemReset};

// -----------------------------------------------------------------------------
// Layout and endpoints
// -----------------------------------------------------------------------------

pub const SLOT_CAPACITY: u32 = 0x8_0000;
pub const SLOT1_OFFSET: usize = SLOT_CAPACITY as usize;
pub const FLASH_SIZE: usize = 2 * SLOT_CAPACITY as usize;

/// Image length for full-pipeline tests. Deliberately not a multiple of the
/// flash word size, so the write path has to pad the final word.
pub const IMAGE_LEN: usize = 200_011;

pub const RUNNING_IMAGE_LEN: usize = 160_000;

pub const PRIMARY_MANIFEST_URL: &str = "http://updates.example.com/light/firmware.json";
pub const PRIMARY_FIRMWARE_URL: &str = "http://updates.example.com/light/firmware.bin";
pub const SECONDARY_MANIFEST_URL: &str = "http://mirror.example.net/light/firmware.json";
pub const SECONDARY_FIRMWARE_URL: &str = "http://mirror.example.net/light/firmware.bin";

pub fn test_endpoints() -> SourceEndpoints {
    SourceEndpoints {
        primary: SourceEndpoint {
            manifest_url: PRIMARY_MANIFEST_URL,
            firmware_url: PRIMARY_FIRMWARE_URL,
        },
        secondary: SourceEndpoint {
            manifest_url: SECONDARY_MANIFEST_URL,
            firmware_url: SECONDARY_FIRMWARE_URL,
        },
    }
}

// -----------------------------------------------------------------------------
// Builders
// -----------------------------------------------------------------------------

/// Build an image with a valid descriptor followed by a deterministic body.
pub fn test_image(version: &str, len: usize) -> Vec<u8> {
    assert!(len >= APP_DESC_SIZE);
    let mut descriptor = AppDescriptor::zeroed();
    descriptor.magic_word = APP_DESC_MAGIC_WORD;
    copy_field(&mut descriptor.version, version);
    copy_field(&mut descriptor.project_name, "myrt-light");
    copy_field(&mut descriptor.date, "2026-08-10");
    copy_field(&mut descriptor.time, "12:34:56");
    copy_field(&mut descriptor.idf_ver, "v5.3.1");

    let mut image = vec![0u8; len];
    image[..APP_DESC_SIZE].copy_from_slice(bytemuck::bytes_of(&descriptor));
    for (i, byte) in image[APP_DESC_SIZE..].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    image
}

fn copy_field(dst: &mut [u8], value: &str) {
    dst[..value.len()].copy_from_slice(value.as_bytes());
}

pub fn digest_of(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn manifest_json(version: &str, size: usize, sha256: Option<&str>) -> String {
    match sha256 {
        Some(digest) => format!(
            r#"{{"version":"{version}","build_date":"2026-08-10","size_bytes":{size},"sha256":"{digest}"}}"#
        ),
        None => format!(r#"{{"version":"{version}","build_date":"2026-08-10","size_bytes":{size}}}"#),
    }
}

/// Shorthand for heapless strings in expected values.
pub fn hs<const N: usize>(value: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    out.push_str(value).expect("value fits");
    out
}

// -----------------------------------------------------------------------------
// Flash, boot sector and record store doubles
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockFlashError;

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

/// Word-aligned NOR flash over a shared byte vector. Alignment rules are
/// asserted, which is what actually checks the aligned-write pipeline.
pub struct MockFlash {
    pub data: Rc<RefCell<Vec<u8>>>,
}

impl embedded_storage::nor_flash::ErrorType for MockFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let data = self.data.borrow();
        let start = offset as usize;
        bytes.copy_from_slice(&data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.borrow().len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert_eq!(from % Self::ERASE_SIZE as u32, 0, "erase start unaligned");
        assert_eq!(to % Self::ERASE_SIZE as u32, 0, "erase end unaligned");
        self.data.borrow_mut()[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert_eq!(offset % Self::WRITE_SIZE as u32, 0, "write offset unaligned");
        assert_eq!(bytes.len() % Self::WRITE_SIZE, 0, "write length unaligned");
        let start = offset as usize;
        self.data.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

pub struct MockBootSector {
    pub pointer: Rc<Cell<BootSlot>>,
    pub running: BootSlot,
}

impl BootSector for MockBootSector {
    fn running_slot(&self) -> BootSlot {
        self.running
    }

    fn read_boot_sector(&mut self) -> Result<BootSlot, StorageError> {
        Ok(self.pointer.get())
    }

    fn write_boot_sector(&mut self, slot: BootSlot) -> Result<(), StorageError> {
        self.pointer.set(slot);
        Ok(())
    }
}

pub struct MockStateStore {
    pub bytes: Rc<RefCell<[u8; RECORD_SIZE]>>,
}

impl StateStore for MockStateStore {
    async fn read(&mut self, buffer: &mut [u8; RECORD_SIZE]) -> Result<(), StorageError> {
        *buffer = *self.bytes.borrow();
        Ok(())
    }

    async fn write(&mut self, buffer: &[u8; RECORD_SIZE]) -> Result<(), StorageError> {
        *self.bytes.borrow_mut() = *buffer;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Update source double
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub enum ManifestReply {
    Json(String),
    Fail,
    Empty,
    Hang,
}

/// Scripted behavior of the firmware source, plus a log of what was asked.
pub struct SourceScript {
    pub primary_manifest: ManifestReply,
    pub secondary_manifest: ManifestReply,
    pub override_manifest: ManifestReply,
    pub image: Vec<u8>,
    /// Overrides the stream length hint; defaults to the image length.
    pub length_hint: Option<u32>,
    /// Largest read the stream satisfies at once.
    pub read_chunk: usize,
    pub fail_open: bool,
    pub hang_reads: bool,
    pub yield_each_read: bool,
    pub manifest_calls: Vec<String>,
    pub image_calls: Vec<String>,
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            primary_manifest: ManifestReply::Fail,
            secondary_manifest: ManifestReply::Fail,
            override_manifest: ManifestReply::Fail,
            image: Vec::new(),
            length_hint: None,
            read_chunk: 700,
            fail_open: false,
            hang_reads: false,
            yield_each_read: false,
            manifest_calls: Vec::new(),
            image_calls: Vec::new(),
        }
    }
}

pub struct MockSource(pub Rc<RefCell<SourceScript>>);

impl UpdateSource for MockSource {
    async fn fetch_manifest(&mut self, url: &str, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let reply = {
            let mut script = self.0.borrow_mut();
            script.manifest_calls.push(url.to_string());
            match url {
                PRIMARY_MANIFEST_URL => script.primary_manifest.clone(),
                SECONDARY_MANIFEST_URL => script.secondary_manifest.clone(),
                _ => script.override_manifest.clone(),
            }
        };
        match reply {
            ManifestReply::Json(doc) => {
                assert!(doc.len() <= buf.len(), "manifest fixture too large");
                buf[..doc.len()].copy_from_slice(doc.as_bytes());
                Ok(doc.len())
            }
            ManifestReply::Fail => Err(NetworkError::Unreachable),
            ManifestReply::Empty => Ok(0),
            ManifestReply::Hang => core::future::pending().await,
        }
    }

    async fn open_image(&mut self, url: &str) -> Result<impl FirmwareStream, NetworkError> {
        let mut script = self.0.borrow_mut();
        script.image_calls.push(url.to_string());
        if script.fail_open {
            return Err(NetworkError::Unreachable);
        }
        Ok(MockStream {
            data: script.image.clone(),
            pos: 0,
            length_hint: script
                .length_hint
                .unwrap_or(script.image.len() as u32),
            read_chunk: script.read_chunk,
            hang: script.hang_reads,
            yield_each_read: script.yield_each_read,
        })
    }
}

pub struct MockStream {
    data: Vec<u8>,
    pos: usize,
    length_hint: u32,
    read_chunk: usize,
    hang: bool,
    yield_each_read: bool,
}

#[derive(Debug)]
pub struct MockStreamError;

impl embedded_io_async::Error for MockStreamError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        embedded_io_async::ErrorKind::Other
    }
}

impl embedded_io_async::ErrorType for MockStream {
    type Error = MockStreamError;
}

impl embedded_io_async::Read for MockStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.hang {
            core::future::pending::<()>().await;
        }
        if self.yield_each_read {
            embassy_futures::yield_now().await;
        }
        let n = buf
            .len()
            .min(self.read_chunk)
            .min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl FirmwareStream for MockStream {
    fn content_length(&self) -> u32 {
        self.length_hint
    }
}

// -----------------------------------------------------------------------------
// System probes, clock, reset
// -----------------------------------------------------------------------------

pub struct SystemState {
    pub network: bool,
    pub broker: bool,
    pub bus: bool,
    pub free_memory: u32,
    pub restarts: u32,
    pub now_ms: u64,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            network: true,
            broker: true,
            bus: true,
            free_memory: 120_000,
            restarts: 0,
            now_ms: 1_000,
        }
    }
}

pub struct MockSystem(pub Rc<RefCell<SystemState>>);

impl HealthProbes for MockSystem {
    async fn network_connected(&mut self) -> bool {
        self.0.borrow().network
    }

    async fn broker_connected(&mut self) -> bool {
        self.0.borrow().broker
    }

    async fn peripheral_bus_ok(&mut self) -> bool {
        self.0.borrow().bus
    }

    fn free_memory_bytes(&mut self) -> u32 {
        self.0.borrow().free_memory
    }
}

impl SystemClock for MockSystem {
    fn now_ms(&self) -> u64 {
        // Advance a little on every query so elapsed times are nonzero.
        let mut state = self.0.borrow_mut();
        state.now_ms += 7;
        state.now_ms
    }
}

impl SystemReset for MockSystem {
    fn restart(&mut self) {
        self.0.borrow_mut().restarts += 1;
    }
}

impl SystemPort for MockSystem {}

// -----------------------------------------------------------------------------
// Virtual-time delay
// -----------------------------------------------------------------------------

/// Delay that treats one poll as one millisecond of virtual time.
///
/// Requests are recorded for assertions. A hung future racing against this
/// delay loses after `ms` polls, so timeout paths run in microseconds.
pub struct FakeDelay {
    pub requests: Rc<RefCell<Vec<u32>>>,
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        VirtualSleep {
            remaining: ns / 1_000_000,
        }
        .await;
    }

    async fn delay_us(&mut self, us: u32) {
        VirtualSleep {
            remaining: us / 1_000,
        }
        .await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.requests.borrow_mut().push(ms);
        VirtualSleep { remaining: ms }.await;
    }
}

struct VirtualSleep {
    remaining: u32,
}

impl Future for VirtualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(());
        }
        this.remaining -= 1;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

// -----------------------------------------------------------------------------
// The rig
// -----------------------------------------------------------------------------

pub type TestManager<'s> = OtaManager<
    's,
    NorFlashSlots<MockFlash>,
    MockBootSector,
    MockStateStore,
    MockSource,
    MockSystem,
    FakeDelay,
>;

/// One device worth of fake hardware. Building a manager from the same rig
/// again models a reboot: the new engine sees whatever the last one left in
/// flash, in the boot pointer and in the record store.
pub struct Rig {
    pub flash: Rc<RefCell<Vec<u8>>>,
    pub pointer: Rc<Cell<BootSlot>>,
    pub record_bytes: Rc<RefCell<[u8; RECORD_SIZE]>>,
    pub script: Rc<RefCell<SourceScript>>,
    pub system: Rc<RefCell<SystemState>>,
    pub delays: Rc<RefCell<Vec<u32>>>,
}

impl Rig {
    /// Device running version 1.0.0 out of `ota_0`, blank record store.
    pub fn new() -> Self {
        let flash = Rc::new(RefCell::new(vec![0xFFu8; FLASH_SIZE]));
        let running = test_image("1.0.0", RUNNING_IMAGE_LEN);
        flash.borrow_mut()[..running.len()].copy_from_slice(&running);

        Self {
            flash,
            pointer: Rc::new(Cell::new(BootSlot::Ota0)),
            record_bytes: Rc::new(RefCell::new([0xFF; RECORD_SIZE])),
            script: Rc::new(RefCell::new(SourceScript::default())),
            system: Rc::new(RefCell::new(SystemState::default())),
            delays: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Publish a release on the primary source, digest included.
    pub fn serve_release(&self, version: &str, image: &[u8]) {
        let manifest = manifest_json(version, image.len(), Some(&digest_of(image)));
        let mut script = self.script.borrow_mut();
        script.primary_manifest = ManifestReply::Json(manifest);
        script.image = image.to_vec();
    }

    pub fn slots(&self) -> NorFlashSlots<MockFlash> {
        NorFlashSlots::new(
            MockFlash {
                data: self.flash.clone(),
            },
            SlotRegion {
                offset: 0,
                len: SLOT_CAPACITY,
            },
            SlotRegion {
                offset: SLOT_CAPACITY,
                len: SLOT_CAPACITY,
            },
        )
    }

    pub fn boot(&self) -> MockBootSector {
        MockBootSector {
            pointer: self.pointer.clone(),
            running: self.pointer.get(),
        }
    }

    pub fn store(&self) -> MockStateStore {
        MockStateStore {
            bytes: self.record_bytes.clone(),
        }
    }

    pub fn source(&self) -> MockSource {
        MockSource(self.script.clone())
    }

    pub fn system_port(&self) -> MockSystem {
        MockSystem(self.system.clone())
    }

    pub fn delay(&self) -> FakeDelay {
        FakeDelay {
            requests: self.delays.clone(),
        }
    }

    /// Boot the engine against this rig's hardware.
    pub async fn manager<'s>(&self, session: &'s SharedSession) -> TestManager<'s> {
        OtaManager::init(
            session,
            test_endpoints(),
            self.slots(),
            self.boot(),
            self.store(),
            self.source(),
            self.system_port(),
            self.delay(),
        )
        .await
        .expect("engine init")
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}
