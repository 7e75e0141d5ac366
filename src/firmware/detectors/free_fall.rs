use super::{DetectorInput, DurationAccumulator};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FreeFallConf {
    /// Per-axis magnitude bound in g.
    pub ths: f32,
    /// Seconds all axes must stay within `ths`.
    pub dur: f32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum FreeFallStatus {
    #[default]
    NotDetected = 0,
    Detected = 1,
}

#[derive(Clone, Copy, Debug)]
pub struct FreeFall {
    conf: FreeFallConf,
    dur: DurationAccumulator,
}

impl FreeFall {
    pub fn new(conf: &FreeFallConf) -> Self {
        Self {
            conf: *conf,
            dur: DurationAccumulator::new(),
        }
    }

    /// With `dur == 0` every sample reports `Detected`, including one that
    /// leaves the threshold box, like a 6D NULL axis latching at once.
    pub fn run(&mut self, input: &DetectorInput) -> FreeFallStatus {
        let below_ths = input.acc.iter().all(|a| libm::fabsf(*a) <= self.conf.ths);

        let detected = if below_ths {
            self.dur.advance(input.dtime, self.conf.dur)
        } else {
            self.dur.reset();
            self.dur.reached(self.conf.dur)
        };

        if detected {
            FreeFallStatus::Detected
        } else {
            FreeFallStatus::NotDetected
        }
    }

    pub fn elapsed(&self) -> f32 {
        self.dur.elapsed()
    }
}
