use super::{DetectorInput, DurationAccumulator};
use crate::firmware::dsp::{Iir2, Iir2Conf};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WakeUpConf {
    /// Filtered magnitude in g above which an axis counts as moving.
    pub ths: f32,
    pub wake_dur: f32,
    pub sleep_dur: f32,
    pub iir2: Iir2Conf,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum WakeStatus {
    #[default]
    Inactive = 0,
    Active = 1,
}

#[derive(Clone, Copy, Debug)]
pub struct WakeUp {
    conf: WakeUpConf,
    filters: [Iir2; 3],
    wake: DurationAccumulator,
    sleep: DurationAccumulator,
    status: WakeStatus,
}

impl WakeUp {
    pub fn new(conf: &WakeUpConf) -> Self {
        Self {
            conf: *conf,
            filters: [Iir2::new(&conf.iir2); 3],
            wake: DurationAccumulator::new(),
            sleep: DurationAccumulator::new(),
            status: WakeStatus::Inactive,
        }
    }

    pub fn run(&mut self, input: &DetectorInput) -> WakeStatus {
        let mut above_ths = false;
        for (filter, acc) in self.filters.iter_mut().zip(input.acc) {
            if libm::fabsf(filter.run(acc)) > self.conf.ths {
                above_ths = true;
            }
        }

        if above_ths {
            self.sleep.reset();
            if self.wake.advance(input.dtime, self.conf.wake_dur) {
                self.status = WakeStatus::Active;
            }
        } else {
            self.wake.reset();
            if self.sleep.advance(input.dtime, self.conf.sleep_dur) {
                self.status = WakeStatus::Inactive;
            }
        }

        self.status
    }

    pub fn status(&self) -> WakeStatus {
        self.status
    }
}
