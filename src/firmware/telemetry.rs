use core::sync::atomic::{AtomicU32, Ordering};

static TICKS: AtomicU32 = AtomicU32::new(0);
static SLOT_RUNS: AtomicU32 = AtomicU32::new(0);
static INFERENCE_RUNS: AtomicU32 = AtomicU32::new(0);
static INFERENCE_FAILURES: AtomicU32 = AtomicU32::new(0);
static VALIDATION_COMMANDS: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    pub ticks: u32,
    pub slot_runs: u32,
    pub inference_runs: u32,
    pub inference_failures: u32,
    pub validation_commands: u32,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        ticks: TICKS.load(Ordering::Relaxed),
        slot_runs: SLOT_RUNS.load(Ordering::Relaxed),
        inference_runs: INFERENCE_RUNS.load(Ordering::Relaxed),
        inference_failures: INFERENCE_FAILURES.load(Ordering::Relaxed),
        validation_commands: VALIDATION_COMMANDS.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_slot_run() {
    SLOT_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_inference(ok: bool) {
    INFERENCE_RUNS.fetch_add(1, Ordering::Relaxed);
    if !ok {
        INFERENCE_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_validation_command() {
    VALIDATION_COMMANDS.fetch_add(1, Ordering::Relaxed);
}

pub fn log_snapshot() {
    let s = snapshot();
    log::info!(
        "telemetry: ticks={} slot_runs={} inference_runs={} inference_failures={} validation_commands={}",
        s.ticks,
        s.slot_runs,
        s.inference_runs,
        s.inference_failures,
        s.validation_commands
    );
}
