use fixed::types::I16F16;

use super::slot_flag;
use crate::firmware::{
    config::{active_config, FilterSlotConfig},
    dsp::{Iir2, Iir2Conf, Sample},
    registers::{read_accel, OutputWriter, RegisterFile},
    scheduler::{AlgoSlot, TickContext},
};

/// One filter per axis, in the sample type the config selects.
enum FilterBank {
    Float([Iir2<f32>; 3]),
    Fixed([Iir2<I16F16>; 3]),
}

impl FilterBank {
    fn new(config: &FilterSlotConfig) -> Self {
        if config.fixed_point {
            Self::Fixed([Iir2::new(&config.iir2); 3])
        } else {
            Self::Float([Iir2::new(&config.iir2); 3])
        }
    }

    fn init(&mut self, conf: &Iir2Conf) {
        match self {
            Self::Float(filters) => filters.iter_mut().for_each(|f| f.init(conf)),
            Self::Fixed(filters) => filters.iter_mut().for_each(|f| f.init(conf)),
        }
    }

    fn run(&mut self, acc: [f32; 3]) -> [f32; 3] {
        match self {
            Self::Float(filters) => run_axes(filters, acc),
            Self::Fixed(filters) => run_axes(filters, acc),
        }
    }
}

fn run_axes<S: Sample>(filters: &mut [Iir2<S>; 3], acc: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for ((y, filter), x) in out.iter_mut().zip(filters.iter_mut()).zip(acc) {
        *y = filter.run(S::from_f32(x)).to_f32();
    }
    out
}

/// Publishes raw and filtered acceleration: `acc[3] f32, filtered[3] f32`.
pub struct FilterSlot {
    config: &'static FilterSlotConfig,
    filters: FilterBank,
}

impl Default for FilterSlot {
    fn default() -> Self {
        Self::new(&active_config().filter)
    }
}

impl FilterSlot {
    pub fn new(config: &'static FilterSlotConfig) -> Self {
        Self {
            config,
            filters: FilterBank::new(config),
        }
    }

    pub fn is_fixed_point(&self) -> bool {
        matches!(self.filters, FilterBank::Fixed(_))
    }
}

impl AlgoSlot for FilterSlot {
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, _regs: &mut R) {
        self.filters.init(&self.config.iir2);
    }

    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>) {
        let acc = read_accel(ctx.regs(), self.config.acc_sens);
        let filtered = self.filters.run(acc);

        OutputWriter::new(ctx.regs())
            .put_f32s(&acc)
            .put_f32s(&filtered);

        let flag = slot_flag(ctx.slot());
        ctx.raise(flag);
    }
}
