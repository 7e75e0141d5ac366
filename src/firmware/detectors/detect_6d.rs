use super::{DetectorInput, DurationAccumulator};
use crate::firmware::dsp::{Iir2, Iir2Conf};

const DEG_TO_RAD: f32 = 0.017_453_292;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detect6dConf {
    /// Only classify X and Y.
    pub d4: bool,
    /// Tilt threshold in degrees.
    pub ths_deg: f32,
    /// Seconds an axis must stay selected before the status latches.
    pub dur: f32,
    pub iir2: Iir2Conf,
}

/// Axis pointing along gravity, low or high side.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Null = 0,
    XLow = 1,
    XHigh = 2,
    YLow = 3,
    YHigh = 4,
    ZLow = 5,
    ZHigh = 6,
}

impl Orientation {
    fn from_axis(axis: usize, positive: bool) -> Self {
        match (axis, positive) {
            (0, false) => Self::XLow,
            (0, true) => Self::XHigh,
            (1, false) => Self::YLow,
            (1, true) => Self::YHigh,
            (2, false) => Self::ZLow,
            (2, true) => Self::ZHigh,
            _ => Self::Null,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Detect6d {
    conf: Detect6dConf,
    ths: f32,
    filters: [Iir2; 3],
    dur: DurationAccumulator,
    axis_prev: Orientation,
    status: Orientation,
}

impl Detect6d {
    pub fn new(conf: &Detect6dConf) -> Self {
        Self {
            conf: *conf,
            ths: libm::sinf(conf.ths_deg * DEG_TO_RAD),
            filters: [Iir2::new(&conf.iir2); 3],
            dur: DurationAccumulator::new(),
            axis_prev: Orientation::Null,
            status: Orientation::Null,
        }
    }

    pub fn run(&mut self, input: &DetectorInput) -> Orientation {
        let n_axes = if self.conf.d4 { 2 } else { 3 };

        let mut filtered = [0.0f32; 3];
        for (i, (filter, acc)) in self.filters.iter_mut().zip(input.acc).enumerate() {
            filtered[i] = filter.run(acc);
        }

        let mut axis = Orientation::Null;
        let mut candidates = 0;
        for (i, value) in filtered.iter().take(n_axes).enumerate() {
            if libm::fabsf(*value) > self.ths {
                candidates += 1;
                axis = Orientation::from_axis(i, *value > 0.0);
            }
        }
        if candidates > 1 {
            axis = Orientation::Null;
        }

        if axis != self.axis_prev {
            self.dur.reset();
        }
        if axis != Orientation::Null {
            self.dur.advance(input.dtime, self.conf.dur);
        }
        if self.dur.reached(self.conf.dur) {
            self.status = axis;
        }
        self.axis_prev = axis;

        self.status
    }

    /// `sin(ths_deg)`, the per-axis magnitude threshold in g.
    pub fn threshold(&self) -> f32 {
        self.ths
    }

    pub fn elapsed(&self) -> f32 {
        self.dur.elapsed()
    }
}
