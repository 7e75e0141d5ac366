use embassy_sync::{blocking_mutex::raw::RawMutex, signal::Signal};

/// Source of the per-sample start pulse.
#[allow(async_fn_in_trait)]
pub trait StartPulse {
    async fn wait(&mut self);
}

/// Every tick starts immediately. For host replays and for images where the
/// core is stalled by hardware between samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct FreeRunning;

impl StartPulse for FreeRunning {
    async fn wait(&mut self) {}
}

/// Waits on a signal raised by the start-pulse interrupt.
pub struct SignalPulse<'a, M: RawMutex> {
    signal: &'a Signal<M, ()>,
}

impl<'a, M: RawMutex> SignalPulse<'a, M> {
    pub fn new(signal: &'a Signal<M, ()>) -> Self {
        Self { signal }
    }
}

impl<M: RawMutex> StartPulse for SignalPulse<'_, M> {
    async fn wait(&mut self) {
        self.signal.wait().await;
    }
}

/// Calls a blocking wait, typically the core's stop-until-pulse instruction.
pub struct BlockingPulse<F: FnMut()> {
    wait: F,
}

impl<F: FnMut()> BlockingPulse<F> {
    pub fn new(wait: F) -> Self {
        Self { wait }
    }
}

impl<F: FnMut()> StartPulse for BlockingPulse<F> {
    async fn wait(&mut self) {
        (self.wait)();
    }
}
