//! Second-order IIR section in direct form II.

use core::ops::{Add, Div, Mul, Sub};

use fixed::types::I16F16;

/// Biquad coefficients. `a[0]` is implicitly 1 and never read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Iir2Conf {
    pub b: [f32; 3],
    pub a: [f32; 3],
    /// Preload the delay line from the first sample so a constant input
    /// produces a settled output immediately.
    pub fast_set: bool,
}

impl Iir2Conf {
    pub fn dc_gain_denominator(&self) -> f32 {
        1.0 + self.a[1] + self.a[2]
    }
}

pub trait Sample:
    Copy + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Div<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;

    fn from_f32(value: f32) -> Self;
    fn to_f32(self) -> f32;
}

impl Sample for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;

    fn from_f32(value: f32) -> Self {
        value
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl Sample for I16F16 {
    const ZERO: Self = I16F16::ZERO;
    const ONE: Self = I16F16::ONE;

    fn from_f32(value: f32) -> Self {
        I16F16::saturating_from_num(value)
    }

    fn to_f32(self) -> f32 {
        self.to_num::<f32>()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Iir2<S: Sample = f32> {
    b: [S; 3],
    a: [S; 3],
    w: [S; 3],
    fast_set: bool,
}

impl<S: Sample> Iir2<S> {
    pub fn new(conf: &Iir2Conf) -> Self {
        let mut filter = Self {
            b: [S::ZERO; 3],
            a: [S::ZERO; 3],
            w: [S::ZERO; 3],
            fast_set: false,
        };
        filter.init(conf);
        filter
    }

    /// Loads coefficients, clears the delay line and re-arms fast-set.
    pub fn init(&mut self, conf: &Iir2Conf) {
        self.b = conf.b.map(S::from_f32);
        self.a = conf.a.map(S::from_f32);
        self.w = [S::ZERO; 3];
        self.fast_set = conf.fast_set;
    }

    /// Filters one sample.
    ///
    /// With fast-set armed, the first call divides by `1 + a1 + a2`; a zero
    /// DC gain there is a configuration error the caller must rule out.
    pub fn run(&mut self, x: S) -> S {
        let [_, a1, a2] = self.a;
        let [b0, b1, b2] = self.b;

        if self.fast_set {
            let w0 = x / (S::ONE + a1 + a2);
            self.w = [w0; 3];
            self.fast_set = false;
        }

        self.w[0] = self.w[1];
        self.w[1] = self.w[2];
        self.w[2] = (x - a2 * self.w[0]) - a1 * self.w[1];

        (b0 * self.w[2] + b2 * self.w[0]) + b1 * self.w[1]
    }

    pub fn is_fast_set_armed(&self) -> bool {
        self.fast_set
    }
}
