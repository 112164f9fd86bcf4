/// Real-time clock registers for MBC3. Advanced explicitly by the caller
/// via [`RtcRegisters::advance_to`] rather than sampling the system clock
/// itself, so emulator state stays deterministic and replayable.
#[derive(Clone, Debug, Default)]
pub struct RtcRegisters {
    seconds: u8, // 0x08 (0-59)
    minutes: u8, // 0x09 (0-59)
    hours: u8,   // 0x0A (0-23)
    dl: u8,      // 0x0B (lower 8 bits of day counter)
    dh: u8,      // 0x0C (upper bit of day counter + halt + overflow flags)

    last_seen_secs: Option<u64>,
}

impl RtcRegisters {
    const DAY_CARRY_BIT: u8 = 0b0000_0001;
    const HALT_BIT: u8 = 0b0100_0000;
    const DAY_OVERFLOW_BIT: u8 = 0b1000_0000;

    pub fn new() -> Self {
        RtcRegisters::default()
    }

    /// Advances the live registers by the whole seconds elapsed since the
    /// previous call (or does nothing on the first call, which just seeds
    /// the reference point).
    pub fn advance_to(&mut self, now_secs: u64) {
        let Some(last) = self.last_seen_secs else {
            self.last_seen_secs = Some(now_secs);
            return;
        };
        self.last_seen_secs = Some(now_secs);

        if (self.dh & Self::HALT_BIT) != 0 {
            return;
        }

        let elapsed = now_secs.saturating_sub(last);
        if elapsed == 0 {
            return;
        }

        let total_seconds = u64::from(self.seconds) + elapsed;
        self.seconds = (total_seconds % 60) as u8;

        let total_minutes = u64::from(self.minutes) + (total_seconds / 60);
        self.minutes = (total_minutes % 60) as u8;

        let total_hours = u64::from(self.hours) + (total_minutes / 60);
        self.hours = (total_hours % 24) as u8;

        let mut days = u64::from(self.dl) | (u64::from(self.dh & Self::DAY_CARRY_BIT) << 8);
        days += total_hours / 24;

        if days > 0x1FF {
            days %= 0x200;
            self.dh |= Self::DAY_OVERFLOW_BIT;
        }

        self.dl = (days & 0xFF) as u8;
        self.dh = (self.dh & Self::HALT_BIT)
            | ((days >> 8) as u8 & Self::DAY_CARRY_BIT)
            | (self.dh & Self::DAY_OVERFLOW_BIT);
    }

    pub fn read(&self, reg_select: u8) -> u8 {
        match reg_select {
            0x08 => self.seconds,
            0x09 => self.minutes,
            0x0A => self.hours,
            0x0B => self.dl,
            0x0C => self.dh,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, reg_select: u8, value: u8) {
        match reg_select {
            0x08 => self.seconds = value.min(59),
            0x09 => self.minutes = value.min(59),
            0x0A => self.hours = value.min(23),
            0x0B => self.dl = value,
            0x0C => {
                self.dh = (value & (Self::DAY_CARRY_BIT | Self::HALT_BIT))
                    | (self.dh & Self::DAY_OVERFLOW_BIT);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_seconds_minutes_hours() {
        let mut rtc = RtcRegisters::new();
        rtc.advance_to(1000);
        rtc.advance_to(1000 + 3661); // +1h1m1s
        assert_eq!(rtc.read(0x08), 1);
        assert_eq!(rtc.read(0x09), 1);
        assert_eq!(rtc.read(0x0A), 1);
    }

    #[test]
    fn halted_clock_does_not_advance() {
        let mut rtc = RtcRegisters::new();
        rtc.write(0x0C, RtcRegisters::HALT_BIT);
        rtc.advance_to(0);
        rtc.advance_to(10_000);
        assert_eq!(rtc.read(0x08), 0);
    }

    #[test]
    fn day_counter_overflow_sets_flag() {
        let mut rtc = RtcRegisters::new();
        rtc.advance_to(0);
        rtc.advance_to(0x200 * 86_400); // 512 days
        assert_ne!(rtc.read(0x0C) & RtcRegisters::DAY_OVERFLOW_BIT, 0);
    }
}
