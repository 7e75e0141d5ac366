//! Gesture window classifier.
//!
//! Band-passes the three accelerometer axes, waits for a sustained X-axis
//! swing, fills the network input window with the following samples and
//! classifies the window once it is full.

use super::slot_flag;
use crate::firmware::{
    config::{active_config, GestureSlotConfig},
    dsp::Iir2,
    inference::{init_buffers, Arenas, BoundBuffers, NetworkEngine},
    registers::{read_accel, OutputWriter, RegisterFile},
    scheduler::{AlgoSlot, TickContext},
    telemetry,
};

mod capture;

pub use capture::{CaptureAction, CaptureActions, CaptureWindow};

pub struct GestureSlot<E: NetworkEngine> {
    config: &'static GestureSlotConfig,
    engine: E,
    arenas: Arenas,
    buffers: Option<BoundBuffers>,
    filters: [Iir2; 3],
    window: CaptureWindow,
    prediction: Option<usize>,
}

impl<E: NetworkEngine> GestureSlot<E> {
    pub fn new(config: &'static GestureSlotConfig, engine: E, arenas: Arenas) -> Self {
        Self {
            config,
            engine,
            arenas,
            buffers: None,
            filters: [Iir2::new(&config.iir2); 3],
            window: CaptureWindow::new(config),
            prediction: None,
        }
    }

    pub fn with_engine(engine: E, arenas: Arenas) -> Self {
        Self::new(&active_config().gesture, engine, arenas)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Index into the configured labels, `None` for the null label.
    pub fn prediction(&self) -> Option<usize> {
        self.prediction
    }

    pub fn capturing(&self) -> bool {
        self.window.capturing()
    }

    fn label(&self) -> u8 {
        self.prediction
            .and_then(|index| self.config.labels.get(index).copied())
            .unwrap_or(self.config.null_label)
    }

    fn probability(&self, index: usize) -> f32 {
        self.buffers
            .as_ref()
            .and_then(|bound| bound.outputs.get(0))
            .and_then(|buffer| buffer.load_f32(index))
            .unwrap_or(0.0)
    }

    fn store(&mut self, index: u16, sample: [f32; 3]) {
        let Some(input) = self.buffers.as_ref().and_then(|bound| bound.inputs.get(0)) else {
            return;
        };
        let row = usize::from(index) * 3;
        for (ch, value) in sample.into_iter().enumerate() {
            if !input.store_f32(row + ch, value) {
                log::trace!("gesture: input window overflow index={}", index);
                return;
            }
        }
    }

    fn classify(&mut self) {
        if self.buffers.is_none() {
            self.prediction = None;
            return;
        }

        let result = self.engine.run();
        telemetry::record_inference(result.is_ok());
        if let Err(err) = result {
            log::warn!("gesture: inference failed code={:#x}", err.code());
            self.prediction = None;
            return;
        }

        let mut best = None;
        let mut max_prob = -1.0f32;
        for index in 0..self.config.labels.len() {
            let prob = self.probability(index);
            if prob > max_prob {
                max_prob = prob;
                best = Some(index);
            }
        }
        if max_prob < self.config.pred_ths {
            best = None;
        }

        self.prediction = best;
        log::debug!(
            "gesture: classified label={} score={}",
            self.label() as char,
            max_prob
        );
    }
}

impl<E: NetworkEngine> AlgoSlot for GestureSlot<E> {
    fn on_configure<R: RegisterFile + ?Sized>(&mut self, _regs: &mut R) {
        for filter in &mut self.filters {
            filter.init(&self.config.iir2);
        }
        self.window = CaptureWindow::new(self.config);
        self.prediction = None;

        if let Err(err) = self.engine.init() {
            log::warn!("gesture: engine init failed code={:#x}", err.code());
            return;
        }
        let mut arenas = core::mem::take(&mut self.arenas);
        match init_buffers(&mut self.engine, &mut arenas) {
            Ok(bound) => {
                log::info!(
                    "gesture: configured inputs={} outputs={} labels={}",
                    bound.inputs.len(),
                    bound.outputs.len(),
                    self.config.labels.len()
                );
                self.buffers = Some(bound);
            }
            Err(err) => log::warn!("gesture: buffer binding failed err={:?}", err),
        }
    }

    fn on_tick<R: RegisterFile + ?Sized>(&mut self, ctx: &mut TickContext<'_, R>) {
        let acc = read_accel(ctx.regs(), self.config.acc_sens);
        let mut filtered = [0.0f32; 3];
        for ((out, filter), x) in filtered.iter_mut().zip(&mut self.filters).zip(acc) {
            *out = filter.run(x);
        }

        let actions = self.window.feed(filtered);
        for action in actions.iter() {
            match *action {
                CaptureAction::Store { index, sample } => self.store(index, sample),
                CaptureAction::RunInference => self.classify(),
            }
        }

        let mut writer = OutputWriter::new(ctx.regs());
        writer.put_f32s(&acc).put_u8(u8::from(self.window.capturing()));
        for index in 0..self.config.labels.len() {
            writer.put_f32(self.probability(index));
        }
        writer.put_u8(self.label());

        let flag = slot_flag(ctx.slot());
        ctx.raise(flag);
    }
}
