//! On-sensor side of the host validation protocol.
//!
//! The host drives the image through `IF2S_FLAG` command bits and reads
//! results through `DOUT_00`. Multi-value replies are streamed one scalar at
//! a time: the image writes the value, raises `S2IF_FLAG` and waits for the
//! host to clear it. `IF2S_FLAG` bits are write-one-to-clear.

use embassy_futures::{block_on, yield_now};
use static_cell::StaticCell;

use super::{
    inference::{
        init_buffers, return_code, Arenas, BindError, BoundBuffers, NetworkEngine, TensorInfo,
    },
    registers::{
        OutputWriter, RegisterFile, BOOT_DONE, DOUT_00, IF2S_FLAG, INT_PIN, S2IF_FLAG, STATUS,
    },
    scheduler::StartPulse,
    telemetry,
};

pub const CMD_RUN: u8 = 0x01;
pub const CMD_IN_INFO: u8 = 0x02;
pub const CMD_OUT_INFO: u8 = 0x04;
pub const CMD_VERSIONS: u8 = 0x08;
pub const CMD_NODES: u8 = 0x10;

/// Byte offsets of the boot table, relative to `DOUT_00`. The first word is
/// left for run return codes.
pub mod table {
    pub const NAME: u32 = 4;
    pub const N_INPUTS: u32 = 8;
    pub const INPUTS: u32 = 9;
    pub const N_OUTPUTS: u32 = 13;
    pub const OUTPUTS: u32 = 14;
    pub const OUTPUT_SIZES: u32 = 18;
    pub const MACC: u32 = 22;
    pub const N_ACTIVATIONS: u32 = 30;
    pub const ACTIVATION_SIZES: u32 = 31;
    pub const N_WEIGHTS: u32 = 35;
    pub const WEIGHT_SIZES: u32 = 36;
}

static BUFFERS: StaticCell<BoundBuffers> = StaticCell::new();

/// Home of the bound buffer set for the lifetime of the image. The host
/// dereferences the address tables inside it, so it must never move.
///
/// Returns `None` after the first call.
pub fn buffer_storage() -> Option<&'static mut BoundBuffers> {
    BUFFERS.try_init(BoundBuffers::default())
}

fn device_addr<T: ?Sized>(ptr: *const T) -> u32 {
    ptr.cast::<u8>() as usize as u32
}

pub struct ValidationResponder<R, E, P> {
    regs: R,
    engine: E,
    pulse: P,
    buffers: Option<&'static BoundBuffers>,
}

impl<R: RegisterFile, E: NetworkEngine, P: StartPulse> ValidationResponder<R, E, P> {
    pub fn new(regs: R, engine: E, pulse: P) -> Self {
        Self {
            regs,
            engine,
            pulse,
            buffers: None,
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn buffers(&self) -> Option<&'static BoundBuffers> {
        self.buffers
    }

    /// Initialises the network, binds its buffers into `storage`, publishes
    /// the boot table and raises `BOOT_DONE`.
    ///
    /// Boot always completes; a binding failure leaves the buffer pointers in
    /// the table at zero and is returned to the caller.
    pub fn boot(
        &mut self,
        arenas: &mut Arenas,
        storage: &'static mut BoundBuffers,
    ) -> Result<(), BindError> {
        self.regs.write_u8(INT_PIN, 0x02);

        if let Err(err) = self.engine.init() {
            log::warn!("validate: engine init failed code={:#x}", err.code());
        }
        let result = init_buffers(&mut self.engine, arenas).map(|bound| {
            *storage = bound;
            let storage: &'static BoundBuffers = storage;
            self.buffers = Some(storage);
        });
        if let Err(err) = result {
            log::warn!("validate: buffer binding failed err={:?}", err);
        }

        self.publish_table();
        self.regs.or_u8(STATUS, BOOT_DONE);
        log::info!(
            "validate: boot name={:?} bound={}",
            self.engine.info().name,
            self.buffers.is_some()
        );
        result
    }

    fn publish_table(&mut self) {
        let info = self.engine.info();
        let layout = self.engine.layout();
        let (inputs, outputs) = match self.buffers {
            Some(bound) => (
                bound.inputs.address_table(),
                bound.outputs.address_table(),
            ),
            None => (0, 0),
        };

        OutputWriter::at(&mut self.regs, DOUT_00 + table::NAME)
            .put_u32(device_addr(info.name.as_ptr()))
            .put_u8(layout.inputs.len() as u8)
            .put_u32(inputs)
            .put_u8(layout.outputs.len() as u8)
            .put_u32(outputs)
            .put_u32(device_addr(layout.outputs.sizes.as_ptr()))
            .put_u64(info.macc)
            .put_u8(layout.activations.len() as u8)
            .put_u32(device_addr(layout.activations.sizes.as_ptr()))
            .put_u8(layout.weight_sizes.len() as u8)
            .put_u32(device_addr(layout.weight_sizes.as_ptr()));
    }

    /// Sleeps on start pulses until the host posts a command, executes every
    /// requested bit and acknowledges on INT1. Returns the command bits.
    pub async fn serve_command(&mut self) -> u8 {
        let flags = loop {
            let flags = self.regs.read_u8(IF2S_FLAG);
            if flags != 0 {
                break flags;
            }
            self.pulse.wait().await;
        };
        telemetry::record_validation_command();
        log::debug!("validate: command flags={:#04x}", flags);

        self.regs.and_u8(INT_PIN, 0x02);

        if flags & CMD_RUN != 0 {
            self.run_network();
        }
        if flags & CMD_IN_INFO != 0 {
            let tensors = self.engine.input_info();
            self.send_tensors(tensors).await;
        }
        if flags & CMD_OUT_INFO != 0 {
            let tensors = self.engine.output_info();
            self.send_tensors(tensors).await;
        }
        if flags & CMD_VERSIONS != 0 {
            self.send_versions().await;
        }
        if flags & CMD_NODES != 0 {
            self.send_nodes().await;
        }

        self.regs.write_u8(IF2S_FLAG, 0xFF);
        self.regs.or_u8(INT_PIN, 0x01);
        flags
    }

    pub fn serve_command_blocking(&mut self) -> u8 {
        block_on(self.serve_command())
    }

    pub async fn run(&mut self) -> ! {
        loop {
            self.serve_command().await;
        }
    }

    fn run_network(&mut self) {
        self.regs.and_u8(INT_PIN, 0x01);
        let result = self.engine.run();
        self.regs.or_u8(INT_PIN, 0x02);

        telemetry::record_inference(result.is_ok());
        let code = return_code(result);
        if code != 0 {
            log::warn!("validate: run failed code={:#x}", code);
        }
        self.regs.write_u32(DOUT_00, code);
    }

    async fn signal_and_wait(&mut self) {
        self.regs.write_u8(S2IF_FLAG, 0x01);
        while self.regs.read_u8(S2IF_FLAG) == 0x01 {
            yield_now().await;
        }
    }

    async fn send_u8(&mut self, value: u8) {
        self.regs.write_u8(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_u16(&mut self, value: u16) {
        self.regs.write_u16(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_i16(&mut self, value: i16) {
        self.regs.write_i16(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_u32(&mut self, value: u32) {
        self.regs.write_u32(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_i32(&mut self, value: i32) {
        self.regs.write_i32(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_f32(&mut self, value: f32) {
        self.regs.write_f32(DOUT_00, value);
        self.signal_and_wait().await;
    }

    async fn send_tensors(&mut self, tensors: &'static [TensorInfo]) {
        self.send_u16(tensors.len() as u16).await;
        for tensor in tensors {
            self.send_u32(tensor.format).await;

            self.send_u32(tensor.shape.len() as u32).await;
            for dim in tensor.shape {
                self.send_i32(*dim).await;
            }

            self.send_u32(tensor.scale.len() as u32).await;
            for scale in tensor.scale {
                self.send_f32(*scale).await;
            }

            self.send_u32(tensor.zero_point.len() as u32).await;
            for zero_point in tensor.zero_point {
                self.send_i16(*zero_point).await;
            }

            // name bytes packed little-endian, zero padded to a whole word
            let name = tensor.name.as_bytes();
            self.send_u32(name.len() as u32).await;
            for chunk in name.chunks(4) {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.send_u32(u32::from_le_bytes(word)).await;
            }
        }
    }

    async fn send_versions(&mut self) {
        let info = self.engine.info();
        for version in [info.runtime_version, info.tool_version] {
            self.send_u8(version.major).await;
            self.send_u8(version.minor).await;
            self.send_u8(version.micro).await;
        }
    }

    async fn send_nodes(&mut self) {
        let nodes = self.engine.nodes();
        self.send_u32(nodes.len() as u32).await;
        for node in nodes {
            self.send_i32(node.id).await;
            self.send_i16(node.kind).await;
            self.send_tensors(node.inputs).await;
            self.send_tensors(node.outputs).await;
        }
    }
}
