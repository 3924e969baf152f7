//! Pulse timer.
//!
//! One 16-bit countdown shared by programming, forming and the read settle
//! window, plus the two width presets. A count of N keeps the caller's row
//! pattern on the bus for exactly N ticks; a count of 0 still takes one
//! tick to expire.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTimer {
    /// Remaining ticks of the current pulse
    pub counter: u16,
    /// Programming pulse unit, set by SET_TIMING
    pub pulse_width: u16,
    /// Forming pulse length (fixed at its reset value)
    pub form_width: u16,
}

impl PulseTimer {
    pub fn new(pulse_width: u16, form_width: u16) -> Self {
        PulseTimer { counter: 0, pulse_width, form_width }
    }

    /// PROG_CELL duration. Computed in the counter's 16-bit width, so large
    /// products wrap exactly like the hardware register.
    pub fn program_count(&self, multiplier: u8) -> u16 {
        self.pulse_width.wrapping_mul(multiplier as u16)
    }

    pub fn load(&mut self, count: u16) {
        self.counter = count;
    }

    /// Advance one tick. Returns true on the tick the pulse ends.
    pub fn countdown(&mut self) -> bool {
        if self.counter <= 1 {
            self.counter = 0;
            true
        } else {
            self.counter -= 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks_until_done(timer: &mut PulseTimer) -> u32 {
        let mut n = 1;
        while !timer.countdown() { n += 1; }
        n
    }

    #[test]
    fn test_countdown_length() {
        let mut t = PulseTimer::new(1000, 5000);
        t.load(10);
        assert_eq!(ticks_until_done(&mut t), 10);
        assert_eq!(t.counter, 0);
        t.load(t.form_width);
        assert_eq!(ticks_until_done(&mut t), 5000);
    }

    #[test]
    fn test_zero_count_takes_one_tick() {
        let mut t = PulseTimer::new(0, 0);
        t.load(t.program_count(4));
        assert!(t.countdown());
    }

    #[test]
    fn test_program_count_wraps() {
        let t = PulseTimer::new(256, 5000);
        assert_eq!(t.program_count(3), 768);
        let t = PulseTimer::new(1000, 5000);
        // 1000 * 255 = 255000 = 0x3E418 -> low 16 bits
        assert_eq!(t.program_count(255), 0xE418);
    }
}
