//! Per-tick dispatch of the enabled algorithm slots and interrupt routing.
//!
//! One tick walks `WaitPulse -> Dispatch -> AwaitCompletion -> Publish`.
//! The two waits are the only points where the core yields.

use embassy_futures::{block_on, yield_now};

use super::{
    registers::{
        RegisterFile, ALGO, BOOT_DONE, CALL_EN, GLB_CALL_EN, INT1_CTRL, INT2_CTRL, INT_PIN,
        INT_STATUS, STATUS,
    },
    telemetry,
};

mod pulse;
mod slot;

pub use pulse::{BlockingPulse, FreeRunning, SignalPulse, StartPulse};
pub use slot::{AlgoSlot, SlotSet, TickContext};

/// `ALGO` bit `n` enables slot `n`; the matching `CALL_EN` bit is `n + 1`.
pub const fn call_bit(slot: usize) -> u32 {
    1 << (slot + 1)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TickPhase {
    #[default]
    WaitPulse,
    Dispatch,
    AwaitCompletion,
    Publish,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickReport {
    pub int_status: u32,
    pub int_pin: u8,
}

/// Maps the slot flags raised during a tick to the two interrupt lines.
pub fn route_interrupts(int_status: u32, int1_ctrl: u32, int2_ctrl: u32) -> u8 {
    let mut pin = 0;
    if int_status & int1_ctrl != 0 {
        pin |= 0x01;
    }
    if int_status & int2_ctrl != 0 {
        pin |= 0x02;
    }
    pin
}

pub struct Scheduler<R, S, P> {
    regs: R,
    slots: S,
    pulse: P,
    phase: TickPhase,
    int_status: u32,
    configured: u32,
}

impl<R: RegisterFile, S: SlotSet, P: StartPulse> Scheduler<R, S, P> {
    pub fn new(regs: R, slots: S, pulse: P) -> Self {
        Self {
            regs,
            slots,
            pulse,
            phase: TickPhase::WaitPulse,
            int_status: 0,
            configured: 0,
        }
    }

    pub fn boot(&mut self) {
        self.regs.or_u8(STATUS, BOOT_DONE);
        self.regs.write_u8(GLB_CALL_EN, 0x01);
        log::info!("scheduler: boot slots={}", S::LEN);
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn slots(&self) -> &S {
        &self.slots
    }

    /// Advances one phase. Returns the published interrupt state when the
    /// step completed a tick.
    pub async fn step(&mut self) -> Option<TickReport> {
        match self.phase {
            TickPhase::WaitPulse => {
                self.pulse.wait().await;
                self.phase = TickPhase::Dispatch;
                None
            }
            TickPhase::Dispatch => {
                self.dispatch();
                self.phase = TickPhase::AwaitCompletion;
                None
            }
            TickPhase::AwaitCompletion => {
                while self.regs.read_u32(CALL_EN) != 0 {
                    yield_now().await;
                }
                self.phase = TickPhase::Publish;
                None
            }
            TickPhase::Publish => {
                let report = self.publish();
                self.phase = TickPhase::WaitPulse;
                Some(report)
            }
        }
    }

    pub async fn tick(&mut self) -> TickReport {
        loop {
            if let Some(report) = self.step().await {
                return report;
            }
        }
    }

    pub fn run_tick_blocking(&mut self) -> TickReport {
        block_on(self.tick())
    }

    pub async fn run(&mut self) -> ! {
        loop {
            self.tick().await;
        }
    }

    fn dispatch(&mut self) {
        self.int_status = 0;
        self.regs.write_u32(INT_STATUS, 0);
        self.regs.write_u8(INT_PIN, 0);

        let call_en = self.regs.read_u32(ALGO) << 1;
        self.regs.write_u32(CALL_EN, call_en);

        let mut pending = call_en;
        for index in 0..S::LEN {
            let bit = call_bit(index);
            if pending & bit == 0 {
                continue;
            }

            if self.configured & bit == 0 {
                self.slots.configure(index, &mut self.regs);
                self.configured |= bit;
                log::info!("scheduler: configured slot={}", index);
            }

            let mut ctx = TickContext::new(&mut self.regs, &mut self.int_status, index);
            self.slots.tick(index, &mut ctx);
            telemetry::record_slot_run();

            pending &= !bit;
            self.regs.write_u32(CALL_EN, pending);
        }

        if pending != 0 {
            log::trace!("scheduler: no slot for call_en={:#x}", pending);
            self.regs.write_u32(CALL_EN, 0);
        }
    }

    fn publish(&mut self) -> TickReport {
        let int1_ctrl = self.regs.read_u32(INT1_CTRL);
        let int2_ctrl = self.regs.read_u32(INT2_CTRL);
        let report = TickReport {
            int_status: self.int_status,
            int_pin: route_interrupts(self.int_status, int1_ctrl, int2_ctrl),
        };

        self.regs.write_u32(INT_STATUS, report.int_status);
        self.regs.write_u8(INT_PIN, report.int_pin);
        telemetry::record_tick();
        report
    }
}
