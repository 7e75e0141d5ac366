use super::*;
use crate::firmware::{
    config::{
        Detect6dSlotConfig, FilterSlotConfig, FreeFallSlotConfig, GestureSlotConfig,
        WakeUpSlotConfig,
    },
    detectors::{Detect6dConf, FreeFallConf, WakeUpConf},
    dsp::Iir2Conf,
    inference::{
        mock::{leak_arena, MockCall, MockEngine},
        Arenas, BufferClass, ClassLayout, EngineError, NetworkLayout,
    },
    registers::{
        RamRegisterFile, RegisterFile, ALGO, DOUT_00, DTIME_0, DTIME_1, INT1_CTRL, INT_PIN,
        INT_STATUS,
    },
    scheduler::{AlgoSlot, FreeRunning, Scheduler, TickContext},
    telemetry,
};

const SENS: f32 = 0.000_244;
const ONE_G: i16 = 4096;

const PASS: Iir2Conf = Iir2Conf {
    b: [1.0, 0.0, 0.0],
    a: [1.0, 0.0, 0.0],
    fast_set: false,
};

static HALF_GAIN: FilterSlotConfig = FilterSlotConfig {
    acc_sens: SENS,
    fixed_point: false,
    iir2: Iir2Conf {
        b: [0.5, 0.0, 0.0],
        a: [1.0, 0.0, 0.0],
        fast_set: false,
    },
};

const FREE_FALL: FreeFallSlotConfig = FreeFallSlotConfig {
    acc_sens: SENS,
    dtime_multiplier: 1.0,
    detector: FreeFallConf {
        ths: 0.3,
        dur: 0.25,
    },
};

static FREE_FALL_DOUBLED: FreeFallSlotConfig = FreeFallSlotConfig {
    dtime_multiplier: 2.0,
    ..FREE_FALL
};

static WAKE_UP: WakeUpSlotConfig = WakeUpSlotConfig {
    acc_sens: SENS,
    dtime_multiplier: 1.0,
    detector: WakeUpConf {
        ths: 0.1,
        wake_dur: 0.25,
        sleep_dur: 0.5,
        iir2: PASS,
    },
};

static DETECT_6D: Detect6dSlotConfig = Detect6dSlotConfig {
    acc_sens: SENS,
    dtime_multiplier: 1.0,
    detector: Detect6dConf {
        d4: false,
        ths_deg: 50.0,
        dur: 0.5,
        iir2: PASS,
    },
};

static GESTURE: GestureSlotConfig = GestureSlotConfig {
    acc_sens: SENS,
    win_ths: 0.25,
    trig_len: 2,
    win_len: 3,
    reset_len: 2,
    pred_ths: 0.6,
    labels: b"AB",
    null_label: b' ',
    iir2: PASS,
};

fn regs_with_dtime(dtime: f32) -> RamRegisterFile {
    let bits = dtime.to_bits();
    RamRegisterFile::new()
        .with_u16(DTIME_0, bits as u16)
        .with_u16(DTIME_1, (bits >> 16) as u16)
}

/// Runs one tick of `slot` as slot index `index`, returning the raised flags.
fn tick<S: AlgoSlot>(slot: &mut S, regs: &mut RamRegisterFile, index: usize) -> u32 {
    let mut int_status = 0;
    let mut ctx = TickContext::new(regs, &mut int_status, index);
    slot.on_tick(&mut ctx);
    int_status
}

fn status_byte(regs: &mut RamRegisterFile) -> u8 {
    regs.read_u8(DOUT_00 + 12)
}

#[test]
fn filter_slot_publishes_raw_then_filtered() {
    let mut regs = regs_with_dtime(0.04);
    regs.set_accel_raw([ONE_G, -ONE_G, 0]);
    let mut slot = FilterSlot::new(&HALF_GAIN);
    slot.on_configure(&mut regs);

    let flags = tick(&mut slot, &mut regs, 2);

    let one = f32::from(ONE_G) * SENS;
    assert_eq!(flags, slot_flag(2));
    assert_eq!(regs.read_f32(DOUT_00), one);
    assert_eq!(regs.read_f32(DOUT_00 + 4), -one);
    assert_eq!(regs.read_f32(DOUT_00 + 8), 0.0);
    assert_eq!(regs.read_f32(DOUT_00 + 12), one * 0.5);
    assert_eq!(regs.read_f32(DOUT_00 + 16), -one * 0.5);
    assert_eq!(regs.read_f32(DOUT_00 + 20), 0.0);
}

const SMOOTH: Iir2Conf = Iir2Conf {
    b: [0.5, 0.0, 0.0],
    a: [1.0, -0.5, 0.0],
    fast_set: false,
};

static SMOOTH_FLOAT: FilterSlotConfig = FilterSlotConfig {
    acc_sens: SENS,
    fixed_point: false,
    iir2: SMOOTH,
};

static SMOOTH_FIXED: FilterSlotConfig = FilterSlotConfig {
    fixed_point: true,
    ..SMOOTH_FLOAT
};

#[test]
fn fixed_point_filter_slot_tracks_float_slot() {
    let mut float_regs = regs_with_dtime(0.04);
    let mut fixed_regs = regs_with_dtime(0.04);
    let mut float_slot = FilterSlot::new(&SMOOTH_FLOAT);
    let mut fixed_slot = FilterSlot::new(&SMOOTH_FIXED);
    assert!(!float_slot.is_fixed_point());
    assert!(fixed_slot.is_fixed_point());
    float_slot.on_configure(&mut float_regs);
    fixed_slot.on_configure(&mut fixed_regs);

    for raw in [[ONE_G, 0, -ONE_G / 2], [ONE_G / 4, ONE_G, 0], [0, 0, ONE_G]] {
        float_regs.set_accel_raw(raw);
        fixed_regs.set_accel_raw(raw);
        assert_eq!(tick(&mut float_slot, &mut float_regs, 0), slot_flag(0));
        assert_eq!(tick(&mut fixed_slot, &mut fixed_regs, 0), slot_flag(0));

        for offset in (0..12).step_by(4) {
            let raw_addr = DOUT_00 + offset;
            let filtered_addr = raw_addr + 12;
            assert_eq!(fixed_regs.read_f32(raw_addr), float_regs.read_f32(raw_addr));
            let error = fixed_regs.read_f32(filtered_addr) - float_regs.read_f32(filtered_addr);
            assert!(error.abs() < 1e-3, "axis {offset}: error {error}");
        }
    }
    // filtered Z still lags the step
    assert!(fixed_regs.read_f32(DOUT_00 + 20) < f32::from(ONE_G) * SENS * 0.9);
}

#[test]
fn repeated_tick_on_same_inputs_is_deterministic() {
    let mut regs = regs_with_dtime(0.04)
        .with_u32(ALGO, 0b1)
        .with_u32(INT1_CTRL, 0b1);
    regs.set_accel_raw([ONE_G, -ONE_G / 3, ONE_G / 7]);
    let mut scheduler = Scheduler::new(regs, (FilterSlot::new(&HALF_GAIN),), FreeRunning);

    let snapshot = |scheduler: &mut Scheduler<RamRegisterFile, (FilterSlot,), FreeRunning>| {
        let regs = scheduler.regs_mut();
        let dout: Vec<u32> = (0..6).map(|n| regs.read_u32(DOUT_00 + 4 * n)).collect();
        (regs.read_u32(INT_STATUS), regs.read_u8(INT_PIN), dout)
    };

    let first = scheduler.run_tick_blocking();
    let after_first = snapshot(&mut scheduler);
    let second = scheduler.run_tick_blocking();
    let after_second = snapshot(&mut scheduler);

    assert_eq!(first, second);
    assert_eq!(first.int_pin, 0x1);
    assert_eq!(after_first, after_second);
}

#[test]
fn free_fall_slot_detects_after_duration() {
    let mut regs = regs_with_dtime(1.0 / 26.0);
    let mut slot = FreeFallSlot::new(&FREE_FALL);
    slot.on_configure(&mut regs);
    assert_eq!(slot.dtime(), 1.0 / 26.0);

    for _ in 0..6 {
        assert_eq!(tick(&mut slot, &mut regs, 0), slot_flag(0));
        assert_eq!(status_byte(&mut regs), 0);
    }
    tick(&mut slot, &mut regs, 0);
    assert_eq!(status_byte(&mut regs), 1);

    regs.set_accel_raw([ONE_G, 0, 0]);
    tick(&mut slot, &mut regs, 0);
    assert_eq!(status_byte(&mut regs), 0);
    assert_eq!(regs.read_f32(DOUT_00), f32::from(ONE_G) * SENS);
}

#[test]
fn free_fall_slot_applies_dtime_multiplier() {
    let mut regs = regs_with_dtime(1.0 / 26.0);
    let mut slot = FreeFallSlot::new(&FREE_FALL_DOUBLED);
    slot.on_configure(&mut regs);

    for _ in 0..3 {
        tick(&mut slot, &mut regs, 0);
        assert_eq!(status_byte(&mut regs), 0);
    }
    tick(&mut slot, &mut regs, 0);
    assert_eq!(status_byte(&mut regs), 1);
}

#[test]
fn wake_up_slot_wakes_then_sleeps() {
    let mut regs = regs_with_dtime(0.125);
    let mut slot = WakeUpSlot::new(&WAKE_UP);
    slot.on_configure(&mut regs);

    regs.set_accel_raw([ONE_G / 2, 0, 0]);
    tick(&mut slot, &mut regs, 1);
    assert_eq!(status_byte(&mut regs), 0);
    tick(&mut slot, &mut regs, 1);
    assert_eq!(status_byte(&mut regs), 1);

    regs.set_accel_raw([0, 0, 0]);
    for _ in 0..3 {
        tick(&mut slot, &mut regs, 1);
        assert_eq!(status_byte(&mut regs), 1);
    }
    tick(&mut slot, &mut regs, 1);
    assert_eq!(status_byte(&mut regs), 0);
}

#[test]
fn detect_6d_slot_latches_orientation() {
    let mut regs = regs_with_dtime(0.125);
    regs.set_accel_raw([0, 0, ONE_G]);
    let mut slot = Detect6dSlot::new(&DETECT_6D);
    slot.on_configure(&mut regs);

    for _ in 0..3 {
        tick(&mut slot, &mut regs, 0);
        assert_eq!(status_byte(&mut regs), 0);
    }
    tick(&mut slot, &mut regs, 0);
    assert_eq!(status_byte(&mut regs), 6);

    // Tilted between X and Z: ambiguous, but the latched status holds.
    regs.set_accel_raw([3400, 0, 3400]);
    tick(&mut slot, &mut regs, 0);
    assert_eq!(status_byte(&mut regs), 6);
}

#[test]
fn unconfigured_detector_slot_does_not_advance() {
    let mut regs = regs_with_dtime(1.0 / 26.0);
    let mut slot = FreeFallSlot::new(&FREE_FALL);

    for _ in 0..20 {
        tick(&mut slot, &mut regs, 0);
    }
    assert_eq!(status_byte(&mut regs), 0);
}

fn gesture_layout() -> NetworkLayout {
    NetworkLayout {
        activations: ClassLayout::EMPTY,
        inputs: ClassLayout {
            sizes: &[36],
            alignments: &[4],
        },
        outputs: ClassLayout {
            sizes: &[8],
            alignments: &[4],
        },
        states: ClassLayout::EMPTY,
        weight_sizes: &[],
    }
}

fn gesture_arenas() -> Arenas {
    Arenas {
        activations: Some(leak_arena(16)),
        inputs: Some(leak_arena(64)),
        outputs: Some(leak_arena(64)),
        states: None,
    }
}

const PROBS: u32 = DOUT_00 + 13;
const LABEL: u32 = DOUT_00 + 21;

/// Feeds the gesture slot a swing on X with Y carrying the tick number.
/// Returns the capturing byte after each tick.
fn drive_gesture(
    slot: &mut GestureSlot<MockEngine>,
    regs: &mut RamRegisterFile,
    ticks: usize,
) -> Vec<u8> {
    (0..ticks)
        .map(|n| {
            regs.set_accel_raw([ONE_G, n as i16, 0]);
            assert_eq!(tick(slot, regs, 0), 0x1);
            status_byte(regs)
        })
        .collect()
}

#[test]
fn gesture_slot_captures_window_and_classifies() {
    let engine = MockEngine::new(gesture_layout()).with_outputs(&[0.2, 0.8]);
    let mut slot = GestureSlot::new(&GESTURE, engine, gesture_arenas());
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    // reset(2) -> ready, trigger(2) -> update, 3 window samples
    let capturing = drive_gesture(&mut slot, &mut regs, 7);
    assert_eq!(capturing, [0, 0, 0, 1, 1, 1, 0]);

    assert_eq!(slot.prediction(), Some(1));
    assert_eq!(regs.read_f32(PROBS), 0.2);
    assert_eq!(regs.read_f32(PROBS + 4), 0.8);
    assert_eq!(regs.read_u8(LABEL), b'B');
    assert_eq!(regs.read_f32(DOUT_00), f32::from(ONE_G) * SENS);

    let x = f32::from(ONE_G) * SENS;
    let expected: Vec<f32> = (4..7)
        .flat_map(|n| [x, n as f32 * SENS, 0.0])
        .collect();
    assert_eq!(slot.engine().last_inputs(), expected.as_slice());

    let calls = slot.engine().calls();
    assert_eq!(calls.first(), Some(&MockCall::Init));
    assert_eq!(
        calls.iter().filter(|call| **call == MockCall::Run).count(),
        1
    );
}

#[test]
fn gesture_slot_reports_null_label_below_threshold() {
    let engine = MockEngine::new(gesture_layout()).with_outputs(&[0.5, 0.4]);
    let mut slot = GestureSlot::new(&GESTURE, engine, gesture_arenas());
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    drive_gesture(&mut slot, &mut regs, 7);

    assert_eq!(slot.prediction(), None);
    assert_eq!(regs.read_u8(LABEL), b' ');
    assert_eq!(regs.read_f32(PROBS), 0.5);
}

#[test]
fn gesture_slot_waits_out_reset_before_rearming() {
    let engine = MockEngine::new(gesture_layout()).with_outputs(&[0.1, 0.9]);
    let mut slot = GestureSlot::new(&GESTURE, engine, gesture_arenas());
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    let capturing = drive_gesture(&mut slot, &mut regs, 7 + 4);
    assert_eq!(&capturing[7..], [0, 0, 0, 1]);
    assert_eq!(regs.read_u8(LABEL), b'B');
}

#[test]
fn gesture_slot_trigger_needs_consecutive_samples() {
    let engine = MockEngine::new(gesture_layout());
    let mut slot = GestureSlot::new(&GESTURE, engine, gesture_arenas());
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    drive_gesture(&mut slot, &mut regs, 2);
    for raw in [ONE_G, 0, ONE_G, 0, ONE_G] {
        regs.set_accel_raw([raw, 0, 0]);
        tick(&mut slot, &mut regs, 0);
        assert_eq!(status_byte(&mut regs), 0);
    }
    assert!(!slot.capturing());
}

#[test]
fn gesture_slot_failed_run_yields_null_label() {
    let before = telemetry::snapshot();
    let engine = MockEngine::new(gesture_layout())
        .with_outputs(&[0.0, 1.0])
        .with_run_result(Err(EngineError::Runtime(0x51)));
    let mut slot = GestureSlot::new(&GESTURE, engine, gesture_arenas());
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    drive_gesture(&mut slot, &mut regs, 7);

    assert_eq!(slot.prediction(), None);
    assert_eq!(regs.read_u8(LABEL), b' ');
    let after = telemetry::snapshot();
    assert!(after.inference_failures > before.inference_failures);
}

#[test]
fn gesture_slot_without_buffers_keeps_publishing() {
    let engine = MockEngine::new(gesture_layout());
    let arenas = Arenas {
        activations: None,
        ..gesture_arenas()
    };
    let mut slot = GestureSlot::new(&GESTURE, engine, arenas);
    let mut regs = regs_with_dtime(0.01);
    slot.on_configure(&mut regs);

    drive_gesture(&mut slot, &mut regs, 7);

    assert_eq!(regs.read_f32(PROBS), 0.0);
    assert_eq!(regs.read_u8(LABEL), b' ');
    assert!(!slot.engine().calls().contains(&MockCall::Run));
    assert!(!slot
        .engine()
        .calls()
        .contains(&MockCall::SetBuffers(BufferClass::Inputs, 1)));
}

#[test]
fn scheduler_configures_and_routes_slot_flags() {
    let mut regs = regs_with_dtime(1.0 / 26.0)
        .with_u32(ALGO, 0b10)
        .with_u32(INT1_CTRL, slot_flag(1));
    regs.set_accel_raw([ONE_G, 0, 0]);
    let mut scheduler = Scheduler::new(
        regs,
        (FilterSlot::new(&HALF_GAIN), FreeFallSlot::new(&FREE_FALL)),
        FreeRunning,
    );
    scheduler.boot();

    let report = scheduler.run_tick_blocking();

    assert_eq!(report.int_status, slot_flag(1));
    assert_eq!(report.int_pin, 0x01);
    assert_eq!(scheduler.slots().1.dtime(), 1.0 / 26.0);
    assert_eq!(status_byte(scheduler.regs_mut()), 0);
}
