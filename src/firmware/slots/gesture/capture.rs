use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::firmware::config::GestureSlotConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureAction {
    /// Write one filtered sample into row `index` of the input window.
    Store { index: u16, sample: [f32; 3] },
    RunInference,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureActions {
    len: usize,
    slots: [Option<CaptureAction>; Self::MAX],
}

impl CaptureActions {
    pub const MAX: usize = 2;

    pub const fn new() -> Self {
        Self {
            len: 0,
            slots: [None; Self::MAX],
        }
    }

    pub fn push(&mut self, action: CaptureAction) {
        if self.len >= Self::MAX {
            return;
        }
        self.slots[self.len] = Some(action);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaptureAction> {
        self.slots[..self.len].iter().filter_map(Option::as_ref)
    }
}

#[derive(Clone, Copy, Debug)]
enum CaptureEvent {
    Sample([f32; 3]),
}

#[derive(Default)]
struct DispatchContext {
    actions: CaptureActions,
}

/// Window capture for the gesture slot: RESET → READY → UPDATE → RESET.
pub struct CaptureWindow {
    machine: statig::blocking::StateMachine<CaptureHsm>,
}

impl CaptureWindow {
    pub fn new(config: &'static GestureSlotConfig) -> Self {
        Self {
            machine: CaptureHsm::new(config).state_machine(),
        }
    }

    /// Feeds one band-passed sample and returns what the slot must do with it.
    pub fn feed(&mut self, filtered: [f32; 3]) -> CaptureActions {
        let mut context = DispatchContext::default();
        self.machine
            .handle_with_context(&CaptureEvent::Sample(filtered), &mut context);
        context.actions
    }

    /// True while samples are being written into the input window.
    pub fn capturing(&self) -> bool {
        self.machine.inner().capturing
    }
}

struct CaptureHsm {
    config: &'static GestureSlotConfig,
    trig_cnt: u16,
    win_cnt: u16,
    reset_cnt: u16,
    capturing: bool,
}

impl CaptureHsm {
    fn new(config: &'static GestureSlotConfig) -> Self {
        Self {
            config,
            trig_cnt: 0,
            win_cnt: 0,
            reset_cnt: 0,
            capturing: false,
        }
    }
}

#[state_machine(initial = "State::reset()")]
impl CaptureHsm {
    #[state]
    fn ready(&mut self, context: &mut DispatchContext, event: &CaptureEvent) -> Outcome<State> {
        let _ = context;
        let CaptureEvent::Sample(sample) = event;
        if sample[0] > self.config.win_ths {
            self.trig_cnt = self.trig_cnt.saturating_add(1);
        } else {
            self.trig_cnt = 0;
        }

        if self.trig_cnt >= self.config.trig_len {
            self.trig_cnt = 0;
            self.capturing = true;
            log::trace!("gesture: capture started");
            return Transition(State::update());
        }
        Handled
    }

    #[state]
    fn update(&mut self, context: &mut DispatchContext, event: &CaptureEvent) -> Outcome<State> {
        let CaptureEvent::Sample(sample) = event;
        context.actions.push(CaptureAction::Store {
            index: self.win_cnt,
            sample: *sample,
        });
        self.win_cnt += 1;

        if self.win_cnt >= self.config.win_len {
            self.win_cnt = 0;
            self.capturing = false;
            context.actions.push(CaptureAction::RunInference);
            return Transition(State::reset());
        }
        Handled
    }

    #[state]
    fn reset(&mut self, context: &mut DispatchContext, event: &CaptureEvent) -> Outcome<State> {
        let _ = (context, event);
        self.reset_cnt = self.reset_cnt.saturating_add(1);
        if self.reset_cnt >= self.config.reset_len {
            self.reset_cnt = 0;
            return Transition(State::ready());
        }
        Handled
    }
}
