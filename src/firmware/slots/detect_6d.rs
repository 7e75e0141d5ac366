use super::slot_flag;
use crate::firmware::{
    clock::TickClock,
    config::{active_config, Detect6dSlotConfig},
    detectors::{Detect6d, DetectorInput, Orientation},
    registers::{read_accel, OutputWriter, RegisterFile},
    scheduler::{AlgoSlot, TickContext},
};

/// `acc[3] f32, orientation u8` (codes 0..=6).
pub struct Detect6dSlot {
    config: &'static Detect6dSlotConfig,
    clock: TickClock,
    detector: Detect6d,
    orientation: Orientation,
}

impl Default for Detect6dSlot {
    fn default() -> Self {
        Self::new(&active_config().detect_6d)
    }
}

impl Detect6dSlot {
    pub fn new(config: &'static Detect6dSlotConfig) -> Self {
        Self {
            config,
            clock: TickClock::from_seconds(0.0),
            detector: Detect6d::new(&config.detector),
            orientation: Orientation::Null,
        }
    }
}

impl AlgoSlot for Detect6dSlot {
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, regs: &mut R) {
        self.clock = TickClock::from_registers(regs, self.config.dtime_multiplier);
        self.detector = Detect6d::new(&self.config.detector);
        self.orientation = Orientation::Null;
        log::info!(
            "detect_6d: configured dtime={} d4={} ths={}",
            self.clock.dtime(),
            self.config.detector.d4,
            self.detector.threshold()
        );
    }

    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>) {
        let acc = read_accel(ctx.regs(), self.config.acc_sens);
        let orientation = self.detector.run(&DetectorInput {
            acc,
            dtime: self.clock.dtime(),
        });
        if orientation != self.orientation {
            log::debug!("detect_6d: orientation={:?}", orientation);
            self.orientation = orientation;
        }

        OutputWriter::new(ctx.regs())
            .put_f32s(&acc)
            .put_u8(orientation as u8);

        let flag = slot_flag(ctx.slot());
        ctx.raise(flag);
    }
}
