use super::slot_flag;
use crate::firmware::{
    clock::TickClock,
    config::{active_config, WakeUpSlotConfig},
    detectors::{DetectorInput, WakeUp},
    registers::{read_accel, OutputWriter, RegisterFile},
    scheduler::{AlgoSlot, TickContext},
};

/// `acc[3] f32, status u8` with status 1 while the device is moving.
pub struct WakeUpSlot {
    config: &'static WakeUpSlotConfig,
    clock: TickClock,
    detector: WakeUp,
}

impl Default for WakeUpSlot {
    fn default() -> Self {
        Self::new(&active_config().wake_up)
    }
}

impl WakeUpSlot {
    pub fn new(config: &'static WakeUpSlotConfig) -> Self {
        Self {
            config,
            clock: TickClock::from_seconds(0.0),
            detector: WakeUp::new(&config.detector),
        }
    }
}

impl AlgoSlot for WakeUpSlot {
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, regs: &mut R) {
        self.clock = TickClock::from_registers(regs, self.config.dtime_multiplier);
        self.detector = WakeUp::new(&self.config.detector);
        log::info!("wake_up: configured dtime={}", self.clock.dtime());
    }

    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>) {
        let acc = read_accel(ctx.regs(), self.config.acc_sens);
        let before = self.detector.status();
        let status = self.detector.run(&DetectorInput {
            acc,
            dtime: self.clock.dtime(),
        });
        if status != before {
            log::debug!("wake_up: status={:?}", status);
        }

        OutputWriter::new(ctx.regs())
            .put_f32s(&acc)
            .put_u8(status as u8);

        let flag = slot_flag(ctx.slot());
        ctx.raise(flag);
    }
}
