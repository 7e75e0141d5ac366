use super::registers::{RegisterFile, DTIME_0, DTIME_1};

/// Seconds between two ticks, decoded once when a slot is configured.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickClock {
    dtime: f32,
}

impl TickClock {
    /// Bit-casts `DTIME_1:DTIME_0` to `f32` and applies the image multiplier.
    pub fn from_registers<R: RegisterFile + ?Sized>(regs: &mut R, multiplier: f32) -> Self {
        let lo = u32::from(regs.read_u16(DTIME_0));
        let hi = u32::from(regs.read_u16(DTIME_1));
        Self {
            dtime: f32::from_bits((hi << 16) | lo) * multiplier,
        }
    }

    pub const fn from_seconds(dtime: f32) -> Self {
        Self { dtime }
    }

    pub fn dtime(&self) -> f32 {
        self.dtime
    }
}
