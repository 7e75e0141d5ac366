use super::{
    detectors::{Detect6dConf, FreeFallConf, WakeUpConf},
    dsp::Iir2Conf,
};

#[derive(Clone, Copy, Debug)]
pub struct FilterSlotConfig {
    pub acc_sens: f32,
    pub fixed_point: bool,
    pub iir2: Iir2Conf,
}

#[derive(Clone, Copy, Debug)]
pub struct FreeFallSlotConfig {
    pub acc_sens: f32,
    pub dtime_multiplier: f32,
    pub detector: FreeFallConf,
}

#[derive(Clone, Copy, Debug)]
pub struct WakeUpSlotConfig {
    pub acc_sens: f32,
    pub dtime_multiplier: f32,
    pub detector: WakeUpConf,
}

#[derive(Clone, Copy, Debug)]
pub struct Detect6dSlotConfig {
    pub acc_sens: f32,
    pub dtime_multiplier: f32,
    pub detector: Detect6dConf,
}

#[derive(Clone, Copy, Debug)]
pub struct GestureSlotConfig {
    pub acc_sens: f32,
    /// Filtered X level that arms a capture, in g.
    pub win_ths: f32,
    pub trig_len: u16,
    pub win_len: u16,
    pub reset_len: u16,
    pub pred_ths: f32,
    /// One ASCII label per network class.
    pub labels: &'static [u8],
    pub null_label: u8,
    pub iir2: Iir2Conf,
}

#[derive(Clone, Copy, Debug)]
pub struct IspuConfig {
    pub filter: FilterSlotConfig,
    pub free_fall: FreeFallSlotConfig,
    pub wake_up: WakeUpSlotConfig,
    pub detect_6d: Detect6dSlotConfig,
    pub gesture: GestureSlotConfig,
}

include!(concat!(env!("OUT_DIR"), "/ispu_config.rs"));

pub fn active_config() -> &'static IspuConfig {
    &ISPU_CONFIG
}
