/// Logical button state for one polling instant. No host key-binding lives
/// in this crate; the driver maps its own input device to these eight
/// booleans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonSet {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
    pub select: bool,
}

/// Maps eight logical buttons and the selection nibble onto the JOYP
/// register, raising a Joypad interrupt on any press edge.
#[derive(Clone, Debug)]
pub struct Joypad {
    state: ButtonSet,
    select_bits: u8, // bits 4-5 of P1, as written by the game
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

impl Joypad {
    pub fn new() -> Self {
        Joypad {
            state: ButtonSet::default(),
            select_bits: 0x30,
        }
    }

    pub fn read_p1(&self) -> u8 {
        let mut value = 0x0F;

        if self.select_bits & 0x20 == 0 {
            if self.state.a {
                value &= 0b1110;
            }
            if self.state.b {
                value &= 0b1101;
            }
            if self.state.select {
                value &= 0b1011;
            }
            if self.state.start {
                value &= 0b0111;
            }
        }
        if self.select_bits & 0x10 == 0 {
            if self.state.right {
                value &= 0b1110;
            }
            if self.state.left {
                value &= 0b1101;
            }
            if self.state.up {
                value &= 0b1011;
            }
            if self.state.down {
                value &= 0b0111;
            }
        }

        value | self.select_bits | 0xC0
    }

    pub fn write_p1(&mut self, value: u8) {
        self.select_bits = value & 0x30;
    }

    /// Updates button state, returning `true` if the update should raise a
    /// Joypad interrupt (any button rose from released to pressed while its
    /// group is selected).
    pub fn poll(&mut self, new_state: ButtonSet) -> bool {
        let rose = |was: bool, is: bool| !was && is;

        let action_selected = self.select_bits & 0x20 == 0;
        let direction_selected = self.select_bits & 0x10 == 0;

        let mut interrupt = false;
        if action_selected {
            interrupt |= rose(self.state.a, new_state.a);
            interrupt |= rose(self.state.b, new_state.b);
            interrupt |= rose(self.state.select, new_state.select);
            interrupt |= rose(self.state.start, new_state.start);
        }
        if direction_selected {
            interrupt |= rose(self.state.right, new_state.right);
            interrupt |= rose(self.state.left, new_state.left);
            interrupt |= rose(self.state.up, new_state.up);
            interrupt |= rose(self.state.down, new_state.down);
        }

        self.state = new_state;
        interrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unselected_group_reads_released() {
        let joypad = Joypad::new();
        assert_eq!(joypad.read_p1(), 0xFF);
    }

    #[test]
    fn press_edge_with_group_selected_requests_interrupt() {
        let mut joypad = Joypad::new();
        joypad.write_p1(0x20); // select directions
        let requested = joypad.poll(ButtonSet {
            up: true,
            ..Default::default()
        });
        assert!(requested);
        assert_eq!(joypad.read_p1() & 0x0F, 0b1011);
    }

    #[test]
    fn press_edge_with_group_not_selected_is_silent() {
        let mut joypad = Joypad::new();
        joypad.write_p1(0x10); // select actions only
        let requested = joypad.poll(ButtonSet {
            up: true,
            ..Default::default()
        });
        assert!(!requested);
    }
}
