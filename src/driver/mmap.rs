//! Memory-mapped BCM283x / BCM2711 GPIO register driver
//!
//! Restricted access maps the GPIO block through `/dev/gpiomem`, which the
//! kernel exposes to unprivileged users in the `gpio` group. Broad access maps
//! the same 4 KiB GPIO block through `/dev/mem`, at the SoC peripheral base
//! plus [`GPIO_OFFSET`]. Only the GPIO registers are mapped in either mode;
//! Broad records that the process holds `/dev/mem`, the privilege PWM, I2C
//! and SPI register drivers need for their own blocks.
//!
//! # Register Map (offsets from the GPIO block)
//!
//! | Offset | Register                | Use                          |
//! |--------|-------------------------|------------------------------|
//! | 0x00   | GPFSEL0..5              | 3 bits per pin function      |
//! | 0x1C   | GPSET0..1               | write 1 to drive high        |
//! | 0x28   | GPCLR0..1               | write 1 to drive low         |
//! | 0x34   | GPLEV0..1               | pin level                    |
//! | 0x94   | GPPUD (legacy)          | pull value to latch          |
//! | 0x98   | GPPUDCLK0..1 (legacy)   | latch pull per pin           |
//! | 0xE4   | GPIO_PUP_PDN_CNTRL0..3  | 2 bits per pin pull (2711)   |

use super::{AccessMode, Driver, PinMode, Pull};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::ptr;
use std::time::Duration;

/// GPIO block offset from the peripheral base
pub const GPIO_OFFSET: u64 = 0x20_0000;

/// Peripheral base used when the device tree cannot be read (BCM2711)
pub const DEFAULT_PERIPHERAL_BASE: u64 = 0xFE00_0000;

const BLOCK_LEN: usize = 4096;

#[allow(dead_code)]
mod regs {
    pub const GPFSEL0: usize = 0x00;
    pub const GPSET0: usize = 0x1C;
    pub const GPCLR0: usize = 0x28;
    pub const GPLEV0: usize = 0x34;
    pub const GPPUD: usize = 0x94;
    pub const GPPUDCLK0: usize = 0x98;
    pub const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xE4;
}

/// Highest BCM pin reachable through the register block
pub const MAX_BCM_PIN: u8 = 53;

/// How the SoC latches pull resistor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullScheme {
    /// BCM2835/6/7: GPPUD + GPPUDCLKn clocking sequence
    Legacy,
    /// BCM2711: direct GPIO_PUP_PDN_CNTRL_REGn fields
    Bcm2711,
}

/// Paths and addresses used to open the register window
#[derive(Debug, Clone)]
pub struct MmapConfig {
    pub gpiomem_path: PathBuf,
    pub mem_path: PathBuf,
    /// SoC peripheral base, read from the device tree when `None`
    pub peripheral_base: Option<u64>,
    /// Pull latch scheme, detected from the device tree when `None`
    pub pull_scheme: Option<PullScheme>,
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self {
            gpiomem_path: PathBuf::from("/dev/gpiomem"),
            mem_path: PathBuf::from("/dev/mem"),
            peripheral_base: None,
            pull_scheme: None,
        }
    }
}

struct Mapping {
    base: *mut u32,
    mode: AccessMode,
}

impl Mapping {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: offset is a word-aligned register inside the mapped block.
        unsafe { ptr::read_volatile(self.base.add(offset / 4)) }
    }

    fn write(&self, offset: usize, value: u32) {
        // SAFETY: offset is a word-aligned register inside the mapped block.
        unsafe { ptr::write_volatile(self.base.add(offset / 4), value) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base was returned by a successful mmap of BLOCK_LEN bytes.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, BLOCK_LEN);
        }
    }
}

/// Register driver over a memory-mapped GPIO block
pub struct MmapDriver {
    config: MmapConfig,
    pull_scheme: PullScheme,
    mapping: Option<Mapping>,
}

impl MmapDriver {
    pub fn new(config: MmapConfig) -> Self {
        let pull_scheme = config.pull_scheme.unwrap_or_else(detect_pull_scheme);
        Self {
            config,
            pull_scheme,
            mapping: None,
        }
    }

    fn map(&self, mode: AccessMode) -> io::Result<Mapping> {
        let (path, offset) = match mode {
            AccessMode::Restricted => (&self.config.gpiomem_path, 0),
            AccessMode::Broad => {
                let base = self
                    .config
                    .peripheral_base
                    .unwrap_or_else(detect_peripheral_base);
                (&self.config.mem_path, base + GPIO_OFFSET)
            }
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)?;

        // SAFETY: mapping a device file with a length and offset the kernel
        // validates; the result is checked against MAP_FAILED.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                BLOCK_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        debug!("Mapped {} GPIO block from {}", mode, path.display());
        Ok(Mapping {
            base: base as *mut u32,
            mode,
        })
    }

    fn mapping(&self) -> Option<&Mapping> {
        if self.mapping.is_none() {
            warn!("GPIO register access used before the window was opened");
        }
        self.mapping.as_ref()
    }

    /// Mode of the current mapping, if any
    pub fn access_mode(&self) -> Option<AccessMode> {
        self.mapping.as_ref().map(|m| m.mode)
    }
}

impl Driver for MmapDriver {
    fn open_access(&mut self, mode: AccessMode) -> io::Result<()> {
        let mapping = self.map(mode)?;
        self.mapping = Some(mapping);
        Ok(())
    }

    fn close_access(&mut self) {
        self.mapping = None;
    }

    fn configure_pin(&mut self, bcm: u8, mode: PinMode) {
        let Some(map) = self.mapping() else { return };
        let (offset, shift) = fsel_location(bcm);
        let current = map.read(offset);
        map.write(
            offset,
            (current & !(0b111 << shift)) | (mode.fsel_bits() << shift),
        );
    }

    fn read_pin(&self, bcm: u8) -> bool {
        let Some(map) = self.mapping() else { return false };
        let (offset, bit) = bank_location(regs::GPLEV0, bcm);
        map.read(offset) & bit != 0
    }

    fn write_pin(&mut self, bcm: u8, level: bool) {
        let Some(map) = self.mapping() else { return };
        let base = if level { regs::GPSET0 } else { regs::GPCLR0 };
        let (offset, bit) = bank_location(base, bcm);
        map.write(offset, bit);
    }

    fn set_pull(&mut self, bcm: u8, pull: Pull) {
        let scheme = self.pull_scheme;
        let Some(map) = self.mapping() else { return };
        match scheme {
            PullScheme::Bcm2711 => {
                let (offset, shift) = pup_pdn_location(bcm);
                let current = map.read(offset);
                map.write(
                    offset,
                    (current & !(0b11 << shift)) | (bcm2711_pull_bits(pull) << shift),
                );
            }
            PullScheme::Legacy => {
                let (clk_offset, bit) = bank_location(regs::GPPUDCLK0, bcm);
                map.write(regs::GPPUD, legacy_pull_bits(pull));
                settle();
                map.write(clk_offset, bit);
                settle();
                map.write(regs::GPPUD, 0);
                map.write(clk_offset, 0);
            }
        }
    }
}

/// GPFSELn offset and bit shift for a pin
pub fn fsel_location(bcm: u8) -> (usize, u32) {
    let bcm = bcm as usize;
    (regs::GPFSEL0 + (bcm / 10) * 4, ((bcm % 10) * 3) as u32)
}

/// Offset and bit mask in a 32-pin-per-word register bank
pub fn bank_location(bank: usize, bcm: u8) -> (usize, u32) {
    let bcm = bcm as usize;
    (bank + (bcm / 32) * 4, 1 << (bcm % 32))
}

/// GPIO_PUP_PDN_CNTRL_REGn offset and shift for a pin
pub fn pup_pdn_location(bcm: u8) -> (usize, u32) {
    let bcm = bcm as usize;
    (
        regs::GPIO_PUP_PDN_CNTRL_REG0 + (bcm / 16) * 4,
        ((bcm % 16) * 2) as u32,
    )
}

fn bcm2711_pull_bits(pull: Pull) -> u32 {
    match pull {
        Pull::Off => 0b00,
        Pull::Up => 0b01,
        Pull::Down => 0b10,
    }
}

fn legacy_pull_bits(pull: Pull) -> u32 {
    match pull {
        Pull::Off => 0,
        Pull::Down => 1,
        Pull::Up => 2,
    }
}

// GPPUD needs 150 core cycles of setup and hold.
fn settle() {
    std::thread::sleep(Duration::from_micros(5));
}

/// Read the peripheral base from `/proc/device-tree/soc/ranges`
pub fn detect_peripheral_base() -> u64 {
    fs::read("/proc/device-tree/soc/ranges")
        .ok()
        .and_then(|ranges| parse_soc_ranges(&ranges))
        .unwrap_or(DEFAULT_PERIPHERAL_BASE)
}

/// Parent address of the first `soc/ranges` entry
///
/// 32-bit parent cells sit at bytes 4..8; 64-bit ones (BCM2711) leave those
/// zero and carry the address at bytes 8..12.
pub fn parse_soc_ranges(ranges: &[u8]) -> Option<u64> {
    let word = |at: usize| -> Option<u32> {
        ranges
            .get(at..at + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };
    match word(4)? {
        0 => word(8).filter(|addr| *addr != 0).map(u64::from),
        addr => Some(u64::from(addr)),
    }
}

fn detect_pull_scheme() -> PullScheme {
    match fs::read("/proc/device-tree/compatible") {
        Ok(compatible) if String::from_utf8_lossy(&compatible).contains("bcm2711") => {
            PullScheme::Bcm2711
        }
        _ => PullScheme::Legacy,
    }
}
