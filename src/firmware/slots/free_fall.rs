use super::slot_flag;
use crate::firmware::{
    clock::TickClock,
    config::{active_config, FreeFallSlotConfig},
    detectors::{DetectorInput, FreeFall, FreeFallStatus},
    registers::{read_accel, OutputWriter, RegisterFile},
    scheduler::{AlgoSlot, TickContext},
};

/// `acc[3] f32, status u8`.
pub struct FreeFallSlot {
    config: &'static FreeFallSlotConfig,
    clock: TickClock,
    detector: FreeFall,
    status: FreeFallStatus,
}

impl Default for FreeFallSlot {
    fn default() -> Self {
        Self::new(&active_config().free_fall)
    }
}

impl FreeFallSlot {
    pub fn new(config: &'static FreeFallSlotConfig) -> Self {
        Self {
            config,
            clock: TickClock::from_seconds(0.0),
            detector: FreeFall::new(&config.detector),
            status: FreeFallStatus::NotDetected,
        }
    }

    pub fn dtime(&self) -> f32 {
        self.clock.dtime()
    }
}

impl AlgoSlot for FreeFallSlot {
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, regs: &mut R) {
        self.clock = TickClock::from_registers(regs, self.config.dtime_multiplier);
        self.detector = FreeFall::new(&self.config.detector);
        self.status = FreeFallStatus::NotDetected;
        log::info!("free_fall: configured dtime={}", self.clock.dtime());
    }

    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>) {
        let acc = read_accel(ctx.regs(), self.config.acc_sens);
        let status = self.detector.run(&DetectorInput {
            acc,
            dtime: self.clock.dtime(),
        });
        if status != self.status {
            log::debug!("free_fall: status={:?}", status);
            self.status = status;
        }

        OutputWriter::new(ctx.regs())
            .put_f32s(&acc)
            .put_u8(status as u8);

        let flag = slot_flag(ctx.slot());
        ctx.raise(flag);
    }
}
