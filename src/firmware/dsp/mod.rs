pub mod iir2;

pub use iir2::{Iir2, Iir2Conf, Sample};
