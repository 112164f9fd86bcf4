use crate::cartridge::Cartridge;
use crate::joypad::{ButtonSet, Joypad};
use crate::memory_map::*;
use crate::ppu::{Mode, Ppu};
use crate::save_state::{Cursor, SaveStateError};
use crate::timer::Timer;

/// Interrupt kinds, in priority order (lowest value = highest priority).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    LcdStat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

/// Single address-decoded bus. Owns WRAM/HRAM/IE plus the cartridge, PPU,
/// timer and joypad outright — the design note about MMU<->PPU/Timer/Joypad
/// cycles is sidestepped entirely by giving the MMU sole ownership instead
/// of handing out back-references, the same way the teacher's bus already
/// owns its `Joypad`.
pub struct Mmu {
    wram_bank_0: Box<[u8; WRAM_BANK_0_SIZE]>,
    wram_bank_n: Box<[u8; WRAM_BANK_N_SIZE]>,
    vram: Box<[u8; VRAM_SIZE]>,
    oam: Box<[u8; OAM_SIZE]>,
    hram: Box<[u8; HRAM_SIZE]>,
    interrupt_enable: u8,
    interrupt_flag: u8,

    serial_data: u8,
    serial_control: u8,

    dma_active: bool,
    dma_src: u16,
    dma_progress: u16,
    dma_sub_cycles: u16,

    pub cartridge: Cartridge,
    pub ppu: Ppu,
    pub timer: Timer,
    pub joypad: Joypad,
}

impl Mmu {
    pub fn new(cartridge: Cartridge) -> Self {
        Mmu {
            wram_bank_0: Box::new([0; WRAM_BANK_0_SIZE]),
            wram_bank_n: Box::new([0; WRAM_BANK_N_SIZE]),
            vram: Box::new([0; VRAM_SIZE]),
            oam: Box::new([0; OAM_SIZE]),
            hram: Box::new([0; HRAM_SIZE]),
            interrupt_enable: 0x00,
            interrupt_flag: 0xE1,
            serial_data: 0x00,
            serial_control: 0x7E,
            dma_active: false,
            dma_src: 0,
            dma_progress: 0,
            dma_sub_cycles: 0,
            cartridge,
            ppu: Ppu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
        }
    }

    pub fn dma_active(&self) -> bool {
        self.dma_active
    }

    pub fn request_interrupt(&mut self, kind: Interrupt) {
        self.interrupt_flag |= 1 << (kind as u8);
    }

    pub fn set_buttons(&mut self, buttons: ButtonSet) {
        if self.joypad.poll(buttons) {
            self.request_interrupt(Interrupt::Joypad);
        }
    }

    /// Advances the timer by `cycles`, requesting its interrupt on overflow.
    pub fn tick_timer(&mut self, cycles: u16) {
        if self.timer.tick(cycles) {
            self.request_interrupt(Interrupt::Timer);
        }
    }

    /// Advances the PPU by `cycles`, requesting VBlank/STAT interrupts.
    pub fn tick_ppu(&mut self, cycles: u16) {
        let irqs = self.ppu.tick(cycles, &self.vram[..], &self.oam[..]);
        if irqs.vblank {
            self.request_interrupt(Interrupt::VBlank);
        }
        if irqs.stat {
            self.request_interrupt(Interrupt::LcdStat);
        }
    }

    /// Advances OAM DMA by `cycles`, copying one byte per 4 T-cycles.
    pub fn tick_dma(&mut self, cycles: u16) -> u16 {
        if !self.dma_active {
            return cycles;
        }
        self.dma_sub_cycles += cycles;
        while self.dma_sub_cycles >= 4 && self.dma_active {
            self.dma_sub_cycles -= 4;
            let src = self.dma_src.wrapping_add(self.dma_progress);
            let byte = self.dma_source_byte(src);
            self.oam[self.dma_progress as usize] = byte;
            self.dma_progress += 1;
            if self.dma_progress >= OAM_SIZE as u16 {
                self.dma_active = false;
                self.dma_progress = 0;
                self.dma_sub_cycles = 0;
            }
        }
        cycles
    }

    fn dma_source_byte(&self, addr: u16) -> u8 {
        match addr {
            ROM_BANK_0_START..=ROM_BANK_N_END | EXT_RAM_START..=EXT_RAM_END => {
                self.cartridge.read(addr)
            }
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            WRAM_BANK_0_START..=WRAM_BANK_0_END => {
                self.wram_bank_0[(addr - WRAM_BANK_0_START) as usize]
            }
            WRAM_BANK_N_START..=WRAM_BANK_N_END => {
                self.wram_bank_n[(addr - WRAM_BANK_N_START) as usize]
            }
            ECHO_RAM_START..=ECHO_RAM_END => self.dma_source_byte(addr - 0x2000),
            _ => {
                log::warn!("DMA source {addr:#06X} is outside the usual 0x0000-0xDFFF range");
                0xFF
            }
        }
    }

    fn oam_gated(&self) -> bool {
        self.dma_active || matches!(self.ppu.mode(), Mode::OamScan | Mode::Drawing)
    }

    fn vram_gated(&self) -> bool {
        matches!(self.ppu.mode(), Mode::Drawing)
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        if self.dma_active && addr < 0xFF80 {
            return 0xFF;
        }
        match addr {
            ROM_BANK_0_START..=ROM_BANK_N_END | EXT_RAM_START..=EXT_RAM_END => {
                self.cartridge.read(addr)
            }
            VRAM_START..=VRAM_END => {
                if self.vram_gated() {
                    0xFF
                } else {
                    self.vram[(addr - VRAM_START) as usize]
                }
            }
            WRAM_BANK_0_START..=WRAM_BANK_0_END => {
                self.wram_bank_0[(addr - WRAM_BANK_0_START) as usize]
            }
            WRAM_BANK_N_START..=WRAM_BANK_N_END => {
                self.wram_bank_n[(addr - WRAM_BANK_N_START) as usize]
            }
            ECHO_RAM_START..=ECHO_RAM_END => self.read_byte(addr - 0x2000),
            OAM_START..=OAM_END => {
                if self.oam_gated() {
                    0xFF
                } else {
                    self.oam[(addr - OAM_START) as usize]
                }
            }
            NOT_USABLE_START..=NOT_USABLE_END => 0xFF,
            IO_REGISTERS_START..=IO_REGISTERS_END => self.read_io(addr),
            HRAM_START..=HRAM_END => self.hram[(addr - HRAM_START) as usize],
            INTERRUPT_ENABLE_REGISTER => self.interrupt_enable,
        }
    }

    /// Unguarded VRAM/OAM read for the PPU's own scanline work, bypassing
    /// the CPU-facing mode gates.
    pub fn ppu_read(&self, addr: u16) -> u8 {
        match addr {
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            OAM_START..=OAM_END => self.oam[(addr - OAM_START) as usize],
            _ => 0xFF,
        }
    }

    fn read_io(&self, addr: u16) -> u8 {
        match addr {
            P1_JOYP_ADDR => self.joypad.read_p1(),
            SB_ADDR => self.serial_data,
            SC_ADDR => self.serial_control,
            DIV_ADDR => self.timer.div(),
            TIMA_ADDR => self.timer.tima(),
            TMA_ADDR => self.timer.tma(),
            TAC_ADDR => self.timer.tac(),
            IF_ADDR => self.interrupt_flag | 0xE0,
            LCDC_ADDR | STAT_ADDR | SCY_ADDR | SCX_ADDR | LY_ADDR | LYC_ADDR | BGP_ADDR
            | OBP0_ADDR | OBP1_ADDR | WY_ADDR | WX_ADDR => self.ppu.read_register(addr),
            DMA_ADDR => (self.dma_src >> 8) as u8,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if self.dma_active && addr < 0xFF80 {
            return;
        }
        match addr {
            ROM_BANK_0_START..=ROM_BANK_N_END | EXT_RAM_START..=EXT_RAM_END => {
                self.cartridge.write(addr, value)
            }
            VRAM_START..=VRAM_END => {
                if !self.vram_gated() {
                    self.vram[(addr - VRAM_START) as usize] = value;
                }
            }
            WRAM_BANK_0_START..=WRAM_BANK_0_END => {
                self.wram_bank_0[(addr - WRAM_BANK_0_START) as usize] = value
            }
            WRAM_BANK_N_START..=WRAM_BANK_N_END => {
                self.wram_bank_n[(addr - WRAM_BANK_N_START) as usize] = value
            }
            ECHO_RAM_START..=ECHO_RAM_END => self.write_byte(addr - 0x2000, value),
            OAM_START..=OAM_END => {
                if !self.oam_gated() {
                    self.oam[(addr - OAM_START) as usize] = value;
                }
            }
            NOT_USABLE_START..=NOT_USABLE_END => {}
            IO_REGISTERS_START..=IO_REGISTERS_END => self.write_io(addr, value),
            HRAM_START..=HRAM_END => self.hram[(addr - HRAM_START) as usize] = value,
            INTERRUPT_ENABLE_REGISTER => self.interrupt_enable = value & 0x1F,
        }
    }

    fn write_io(&mut self, addr: u16, value: u8) {
        match addr {
            P1_JOYP_ADDR => self.joypad.write_p1(value),
            SB_ADDR => self.serial_data = value,
            SC_ADDR => self.serial_control = value,
            DIV_ADDR => self.timer.reset_div_counter(),
            TIMA_ADDR => self.timer.set_tima(value),
            TMA_ADDR => self.timer.set_tma(value),
            TAC_ADDR => self.timer.set_tac(value),
            IF_ADDR => self.interrupt_flag = value & 0x1F,
            LCDC_ADDR | STAT_ADDR | SCY_ADDR | SCX_ADDR | LY_ADDR | LYC_ADDR | BGP_ADDR
            | OBP0_ADDR | OBP1_ADDR | WY_ADDR | WX_ADDR => self.ppu.write_register(addr, value),
            DMA_ADDR => self.start_dma(value),
            _ => {}
        }
    }

    fn start_dma(&mut self, source_high_byte: u8) {
        self.dma_src = (source_high_byte as u16) << 8;
        self.dma_active = true;
        self.dma_progress = 0;
        self.dma_sub_cycles = 0;
    }

    pub fn interrupt_enable(&self) -> u8 {
        self.interrupt_enable
    }

    pub fn interrupt_flag(&self) -> u8 {
        self.interrupt_flag
    }

    pub fn set_interrupt_flag(&mut self, value: u8) {
        self.interrupt_flag = value & 0x1F;
    }

    /// Appends WRAM, the 0x80-byte IO register file, HRAM, VRAM, OAM, IE,
    /// IF, and DMA progress, in that order. PPU/timer/cartridge append their
    /// own sections separately (see `Emulator::save_state`).
    pub(crate) fn write_state(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.wram_bank_0[..]);
        buf.extend_from_slice(&self.wram_bank_n[..]);

        let mut io = [0xFFu8; IO_REGISTERS_SIZE];
        io[(P1_JOYP_ADDR - IO_REGISTERS_START) as usize] = self.joypad.read_p1();
        io[(SB_ADDR - IO_REGISTERS_START) as usize] = self.serial_data;
        io[(SC_ADDR - IO_REGISTERS_START) as usize] = self.serial_control;
        io[(DIV_ADDR - IO_REGISTERS_START) as usize] = self.timer.div();
        io[(TIMA_ADDR - IO_REGISTERS_START) as usize] = self.timer.tima();
        io[(TMA_ADDR - IO_REGISTERS_START) as usize] = self.timer.tma();
        io[(TAC_ADDR - IO_REGISTERS_START) as usize] = self.timer.tac();
        io[(IF_ADDR - IO_REGISTERS_START) as usize] = self.interrupt_flag | 0xE0;
        for addr in [
            LCDC_ADDR, STAT_ADDR, SCY_ADDR, SCX_ADDR, LY_ADDR, LYC_ADDR, BGP_ADDR, OBP0_ADDR,
            OBP1_ADDR, WY_ADDR, WX_ADDR,
        ] {
            io[(addr - IO_REGISTERS_START) as usize] = self.ppu.read_register(addr);
        }
        io[(DMA_ADDR - IO_REGISTERS_START) as usize] = (self.dma_src >> 8) as u8;
        buf.extend_from_slice(&io);

        buf.extend_from_slice(&self.hram[..]);
        buf.extend_from_slice(&self.vram[..]);
        buf.extend_from_slice(&self.oam[..]);
        buf.push(self.interrupt_enable);
        buf.push(self.interrupt_flag);
        buf.push(self.dma_active as u8);
        buf.extend_from_slice(&self.dma_src.to_le_bytes());
        buf.extend_from_slice(&self.dma_progress.to_le_bytes());
    }

    pub(crate) fn read_state(&mut self, cur: &mut Cursor) -> Result<(), SaveStateError> {
        self.wram_bank_0.copy_from_slice(cur.bytes(WRAM_BANK_0_SIZE)?);
        self.wram_bank_n.copy_from_slice(cur.bytes(WRAM_BANK_N_SIZE)?);

        let io = cur.bytes(IO_REGISTERS_SIZE)?.to_vec();
        self.joypad.write_p1(io[(P1_JOYP_ADDR - IO_REGISTERS_START) as usize]);
        self.serial_data = io[(SB_ADDR - IO_REGISTERS_START) as usize];
        self.serial_control = io[(SC_ADDR - IO_REGISTERS_START) as usize];
        self.timer.set_tima(io[(TIMA_ADDR - IO_REGISTERS_START) as usize]);
        self.timer.set_tma(io[(TMA_ADDR - IO_REGISTERS_START) as usize]);
        self.timer.set_tac(io[(TAC_ADDR - IO_REGISTERS_START) as usize]);
        for addr in [
            LCDC_ADDR, STAT_ADDR, SCY_ADDR, SCX_ADDR, LY_ADDR, LYC_ADDR, BGP_ADDR, OBP0_ADDR,
            OBP1_ADDR, WY_ADDR, WX_ADDR,
        ] {
            self.ppu.restore_register_raw(addr, io[(addr - IO_REGISTERS_START) as usize]);
        }

        self.hram.copy_from_slice(cur.bytes(HRAM_SIZE)?);
        self.vram.copy_from_slice(cur.bytes(VRAM_SIZE)?);
        self.oam.copy_from_slice(cur.bytes(OAM_SIZE)?);
        self.interrupt_enable = cur.u8()?;
        self.interrupt_flag = cur.u8()?;
        self.dma_active = cur.bool()?;
        self.dma_src = cur.u16()?;
        self.dma_progress = cur.u16()?;
        self.dma_sub_cycles = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    fn blank_cartridge() -> Cartridge {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00; // NoMBC
        rom[0x0148] = 0x00; // 2 banks
        rom[0x0149] = 0x00;
        Cartridge::load(&rom).unwrap()
    }

    #[test]
    fn echo_ram_round_trips_with_wram() {
        let mut mmu = Mmu::new(blank_cartridge());
        mmu.write_byte(0xC010, 0x42);
        assert_eq!(mmu.read_byte(0xE010), 0x42);
        mmu.write_byte(0xE020, 0x99);
        assert_eq!(mmu.read_byte(0xC020), 0x99);
    }

    #[test]
    fn div_write_always_resets_to_zero() {
        let mut mmu = Mmu::new(blank_cartridge());
        mmu.tick_timer(300);
        assert_ne!(mmu.read_byte(DIV_ADDR), 0);
        mmu.write_byte(DIV_ADDR, 0xFF);
        assert_eq!(mmu.read_byte(DIV_ADDR), 0);
    }

    #[test]
    fn oam_dma_gates_low_memory_and_completes_after_160_cycles() {
        let mut mmu = Mmu::new(blank_cartridge());
        mmu.write_byte(0xC100, 0xAB);
        mmu.write_byte(DMA_ADDR, 0xC1);
        assert_eq!(mmu.read_byte(0xC000), 0xFF);
        assert_eq!(mmu.read_byte(HRAM_START), 0x00);
        for _ in 0..40 {
            mmu.tick_dma(4);
        }
        assert!(!mmu.dma_active());
        assert_eq!(mmu.oam[0], 0xAB);
    }
}
