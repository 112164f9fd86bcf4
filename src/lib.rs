pub mod cartridge;
pub mod cpu;
pub mod instruction;
pub mod joypad;
pub mod memory_map;
pub mod mmu;
pub mod ppu;
pub mod rtc;
pub mod save_state;
pub mod timer;

use cartridge::{Cartridge, CartridgeError};
use cpu::Cpu;
use joypad::ButtonSet;
use mmu::Mmu;
use ppu::FrameBuffer;
use save_state::{Cursor, SaveStateError, MAGIC, VERSION};

/// Exact T-cycle length of one 144-line + 10-line-VBlank frame
/// (4,194,304 Hz / 59.7275 Hz), per the frame-driver contract.
pub const CYCLES_PER_FRAME: u32 = 70224;

/// Owns the CPU and the MMU (which in turn owns the cartridge, PPU, timer,
/// and joypad) and drives them one frame at a time. This is the only type a
/// host driver needs to touch.
pub struct Emulator {
    cpu: Cpu,
    mmu: Mmu,
}

impl Emulator {
    /// Builds the cartridge, MBC, and all subsystems from a raw ROM image.
    /// Boot-ROM emulation is out of scope; registers start at their
    /// post-boot-ROM reset values.
    pub fn new(rom_bytes: &[u8]) -> Result<Self, CartridgeError> {
        let cartridge = Cartridge::load(rom_bytes)?;
        let mut mmu = Mmu::new(cartridge);
        let cpu = Cpu::new(true);
        Cpu::initialize_post_boot_io(&mut mmu);
        Ok(Emulator { cpu, mmu })
    }

    /// Runs CPU/Timer/PPU/DMA until exactly one frame's worth of T-cycles
    /// (70,224) has been consumed, then returns the completed frame buffer.
    /// Each iteration: drain 4 cycles of OAM DMA if active, otherwise
    /// execute one CPU instruction; feed the cycle count to Timer, then PPU,
    /// then DMA, in that order.
    pub fn step_frame(&mut self) -> &FrameBuffer {
        let mut cycles_this_frame: u32 = 0;
        while cycles_this_frame < CYCLES_PER_FRAME {
            let cycles: u32 = if self.mmu.dma_active() {
                4
            } else {
                match self.cpu.step(&mut self.mmu) {
                    Ok(cycles) => cycles as u32,
                    Err(error_message) => {
                        panic!("CPU decode failure mid-frame: {error_message}");
                    }
                }
            };
            self.mmu.tick_timer(cycles as u16);
            self.mmu.tick_ppu(cycles as u16);
            self.mmu.tick_dma(cycles as u16);
            cycles_this_frame += cycles;
        }
        self.mmu.ppu.frame_buffer()
    }

    /// The host may call this at any point between `step_frame` calls, but
    /// never concurrently with one.
    pub fn set_buttons(&mut self, buttons: ButtonSet) {
        self.mmu.set_buttons(buttons);
    }

    pub fn has_battery(&self) -> bool {
        self.mmu.cartridge.has_battery()
    }

    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.mmu.cartridge.ram()
    }

    pub fn load_battery_ram(&mut self, data: &[u8]) {
        self.mmu.cartridge.load_ram(data);
    }

    /// Packs the full machine state into a versioned byte stream: magic,
    /// version, MMU section, CPU section, PPU section, Timer section, then
    /// the cartridge's banking-register/ERAM section.
    pub fn save_state(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        self.mmu.write_state(&mut buf);
        self.cpu.write_state(&mut buf);
        self.mmu.ppu.write_state(&mut buf);
        self.mmu.timer.write_state(&mut buf);
        self.mmu.cartridge.write_state(&mut buf);
        buf
    }

    /// Restores state saved by `save_state`. Refuses a mismatched magic or a
    /// version newer than this build supports, leaving `self` untouched.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let mut cur = Cursor::new(bytes);
        let magic: [u8; 4] = cur.bytes(4)?.try_into().unwrap();
        if magic != MAGIC {
            return Err(SaveStateError::BadMagic(magic));
        }
        let version = cur.u32()?;
        if version > VERSION {
            return Err(SaveStateError::UnsupportedVersion(version));
        }

        self.mmu.read_state(&mut cur)?;
        self.cpu.read_state(&mut cur)?;
        self.mmu.ppu.read_state(&mut cur)?;
        self.mmu.timer.read_state(&mut cur)?;
        self.mmu.cartridge.read_state(&mut cur)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00; // NoMBC
        rom[0x0148] = 0x00; // 2 banks
        rom[0x0149] = 0x00;
        rom
    }

    #[test]
    fn new_rejects_unsupported_cartridge_type() {
        let mut rom = blank_rom();
        rom[0x0147] = 0xFF;
        assert!(Emulator::new(&rom).is_err());
    }

    #[test]
    fn save_state_round_trip_preserves_cpu_registers() {
        let rom = blank_rom();
        let mut emu = Emulator::new(&rom).unwrap();
        emu.cpu.a = 0x42;
        emu.cpu.pc = 0x1234;
        let saved = emu.save_state();

        let mut other = Emulator::new(&rom).unwrap();
        other.load_state(&saved).unwrap();
        assert_eq!(other.cpu.a, 0x42);
        assert_eq!(other.cpu.pc, 0x1234);
    }

    #[test]
    fn load_state_rejects_bad_magic() {
        let rom = blank_rom();
        let mut emu = Emulator::new(&rom).unwrap();
        let mut bogus = emu.save_state();
        bogus[0] = b'X';
        assert!(emu.load_state(&bogus).is_err());
    }
}
