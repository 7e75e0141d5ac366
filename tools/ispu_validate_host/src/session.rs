//! Host side of the validation protocol: answers front-end commands by
//! driving the sensor over I2C and watching the ISPU interrupt lines.

use std::{
    io::{self, BufReader, ErrorKind, Read, Write},
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};
use embedded_hal::{delay::DelayNs, digital::InputPin, i2c::I2c};
use ispu_firmware::firmware::{
    registers::BOOT_DONE,
    validate::{table, CMD_IN_INFO, CMD_NODES, CMD_OUT_INFO, CMD_RUN, CMD_VERSIONS},
};

use crate::{
    bus::{reg, SensorBus, ISPU_OFF, ISPU_WAKE, WHO_AM_I_VALUE},
    command::{Command, LineBuffer},
    ucf::{self, UcfOp, MEM_DATA_REG, PAGE_ISPU, PAGE_REG},
};

pub const FIRMWARE_VERSION: &str = "ISPU validation firmware 1.1.1";
/// Largest payload chunk accepted per upload block.
pub const BLOCK_SIZE: usize = 4096;
pub const CANARY: u8 = 0xA5;
pub const EXPECTED_UCF_VERSION: [u8; 2] = [1, 1];

pub const TIMEOUT_ERROR: u32 = 0x1;
pub const STACK_ERROR: u32 = 0x2;
pub const UCF_VERSION_ERROR: u32 = 0x4;

const IDENTIFY_TIMEOUT_US: u64 = 1_000_000;
const POLL_INTERVAL_US: u32 = 100;
const MAX_NAME_LEN: usize = 1024;
const MAX_S2IF_POLLS: u32 = 100_000;

/// Monotonic microsecond time source.
pub trait Clock {
    fn now_us(&mut self) -> u64;
}

pub struct StdClock {
    start: Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for StdClock {
    fn now_us(&mut self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub boot_us: u64,
    pub run_us: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            boot_us: 5_000_000,
            run_us: 30_000_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `TIMEOUT_ERROR | STACK_ERROR` bitmask.
    pub status: u32,
    /// Engine return code, read only when `status` is clean.
    pub engine_code: Option<u32>,
    /// From the first INT2 falling edge to the last rising edge.
    pub exec_us: u64,
    /// One entry per INT2 low period after the first.
    pub layer_us: Vec<u64>,
    pub output_bytes: usize,
}

/// Times the run from INT2 edges. The image drops INT2 when a layer starts
/// and raises it when the layer ends.
#[derive(Debug, Default)]
struct ExecTimer {
    origin: Option<u64>,
    layer_start: u64,
    exec_us: u64,
}

impl ExecTimer {
    /// Returns a layer time on every falling edge after the first.
    fn edge(&mut self, rising: bool, now: u64) -> Option<u64> {
        match (self.origin, rising) {
            (None, false) => {
                self.origin = Some(now);
                None
            }
            (None, true) => None,
            (Some(origin), true) => {
                self.layer_start = now - origin;
                self.exec_us = self.layer_start;
                None
            }
            (Some(origin), false) => Some(now - origin - self.layer_start),
        }
    }
}

/// Upload bytes announced by a command, handed out one prompted block at a
/// time.
struct Payload<R> {
    source: R,
    remaining: usize,
}

impl<R: Read> Payload<R> {
    fn new(source: R, size: usize) -> Self {
        Self {
            source,
            remaining: size,
        }
    }

    /// Prompts for and reads the next block; `None` once the payload is
    /// drained.
    fn next_block<W: Write>(&mut self, out: &mut W) -> Result<Option<Vec<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let len = self.remaining.min(BLOCK_SIZE);
        writeln!(out, "Ready to receive block of size {len}")?;
        out.flush()?;

        let mut block = vec![0u8; len];
        self.source
            .read_exact(&mut block)
            .context("payload ended early")?;
        self.remaining -= len;
        Ok(Some(block))
    }

    /// Drops whatever is left so the stream lines up with the next command.
    fn discard(&mut self) -> Result<()> {
        let mut rest = (&mut self.source).take(self.remaining as u64);
        io::copy(&mut rest, &mut io::sink()).context("skipping payload")?;
        self.remaining = 0;
        Ok(())
    }
}

fn dout(offset: u32) -> u8 {
    reg::DOUT_00 + offset as u8
}

pub struct HostSession<I, P, D, C> {
    bus: SensorBus<I>,
    int1: P,
    int2: P,
    delay: D,
    clock: C,
    timeouts: Timeouts,
}

impl<I, P, D, C> HostSession<I, P, D, C>
where
    I: I2c,
    P: InputPin,
    D: DelayNs,
    C: Clock,
{
    pub fn new(i2c: I, int1: P, int2: P, delay: D, clock: C) -> Self {
        Self {
            bus: SensorBus::new(i2c),
            int1,
            int2,
            delay,
            clock,
            timeouts: Timeouts::default(),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn bus(&self) -> &SensorBus<I> {
        &self.bus
    }

    /// Waits for the sensor to identify itself, then soft-resets it.
    pub fn identify(&mut self) -> Result<()> {
        let start = self.clock.now_us();
        loop {
            self.bus.write(reg::FUNC_CFG_ACCESS, 0x00)?;
            let who_am_i = self.bus.read_u8(reg::WHO_AM_I)?;
            if who_am_i == WHO_AM_I_VALUE {
                break;
            }
            if self.clock.now_us() - start > IDENTIFY_TIMEOUT_US {
                bail!("sensor not recognized ({who_am_i:02x})");
            }
            self.delay.delay_us(POLL_INTERVAL_US);
        }

        let ctrl3 = self.bus.read_u8(reg::CTRL3_C)?;
        self.bus.write(reg::CTRL3_C, ctrl3 | 0x01)?;
        let start = self.clock.now_us();
        while self.bus.read_u8(reg::CTRL3_C)? & 0x01 != 0 {
            if self.clock.now_us() - start > self.timeouts.boot_us {
                bail!("software reset did not complete");
            }
            self.delay.delay_us(POLL_INTERVAL_US);
        }
        Ok(())
    }

    /// Answers commands read from `input` until it ends, writing every reply
    /// to `out`. Upload payloads come from the same stream, one block per
    /// prompt. A failed command reports `error: ...` and the loop goes on.
    /// Returns the number of commands answered.
    pub fn serve<R: Read, W: Write>(&mut self, input: R, out: &mut W) -> Result<usize> {
        let mut input = BufReader::new(input);
        let mut lines = LineBuffer::new();
        let mut served = 0;
        let mut byte = [0u8; 1];
        loop {
            match input.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("reading command stream"),
            }
            let Some(command) = lines.feed(byte[0]) else {
                continue;
            };

            let result = if command.expects_payload() {
                self.receive(&command, &mut input, out)
            } else {
                self.handle(&command, out)
            };
            if let Err(err) = result {
                writeln!(out, "error: {err:#}")?;
            }
            out.flush()?;
            served += 1;
        }
        Ok(served)
    }

    /// Answers one command line. Upload commands are handled by
    /// [`Self::upload`] once their payload is available.
    pub fn handle<W: Write>(&mut self, command: &Command, out: &mut W) -> Result<()> {
        match command {
            Command::Ver => writeln!(out, "{FIRMWARE_VERSION}")?,
            Command::Name => {
                let name = self.bus.with_core_stopped(|bus| {
                    let addr = bus.read_u32(dout(table::NAME))?;
                    bus.read_mem_cstr(addr, MAX_NAME_LEN)
                })?;
                writeln!(out, "{}", String::from_utf8_lossy(&name))?;
            }
            Command::Clock => {
                let ctrl10 = self.bus.read_u8(reg::CTRL10_C)?;
                let freq: u32 = if ctrl10 & 0x04 != 0 { 10_000_000 } else { 5_000_000 };
                writeln!(out, "{freq}")?;
            }
            Command::Macc => {
                let macc = self.bus.in_ispu_page(|bus| {
                    let mut buf = [0u8; 8];
                    bus.read(dout(table::MACC), &mut buf)?;
                    Ok(u64::from_le_bytes(buf))
                })?;
                writeln!(out, "{macc}")?;
            }
            Command::BlockSize | Command::Empty => writeln!(out, "{BLOCK_SIZE}")?,
            Command::TimeoutBoot(secs) => {
                self.timeouts.boot_us = u64::from(*secs) * 1_000_000;
                writeln!(out, "Timeout boot = {}", self.timeouts.boot_us)?;
            }
            Command::TimeoutRun(secs) => {
                self.timeouts.run_us = u64::from(*secs) * 1_000_000;
                writeln!(out, "Timeout run = {}", self.timeouts.run_us)?;
            }
            Command::Canary => {
                let (addr, canary) = self.read_canary()?;
                writeln!(out, "{addr:#X} = 0x{canary:02X}")?;
            }
            Command::GetInInfo => {
                self.request(CMD_IN_INFO)?;
                self.bus.in_ispu_page(|bus| Self::relay_tensor_info(bus, out))?;
            }
            Command::GetOutInfo => {
                self.request(CMD_OUT_INFO)?;
                self.bus.in_ispu_page(|bus| Self::relay_tensor_info(bus, out))?;
            }
            Command::ActivationSizes => {
                self.relay_sizes(table::N_ACTIVATIONS, table::ACTIVATION_SIZES, out)?
            }
            Command::WeightSizes => self.relay_sizes(table::N_WEIGHTS, table::WEIGHT_SIZES, out)?,
            Command::GetVersions => {
                self.request(CMD_VERSIONS)?;
                self.bus.in_ispu_page(|bus| {
                    for _ in 0..6 {
                        Self::wait_ispu(bus)?;
                        writeln!(out, "{}", bus.read_u8(reg::DOUT_00)?)?;
                        Self::signal_ispu(bus)?;
                    }
                    Ok(())
                })?;
            }
            Command::GetNodes => {
                self.request(CMD_NODES)?;
                self.bus.in_ispu_page(|bus| {
                    let count = Self::next_u32(bus)?;
                    writeln!(out, "{count}")?;
                    for _ in 0..count {
                        writeln!(out, "{}", Self::next_u32(bus)? as i32)?;
                        Self::wait_ispu(bus)?;
                        let mut kind = [0u8; 2];
                        bus.read(reg::DOUT_00, &mut kind)?;
                        writeln!(out, "{}", i16::from_le_bytes(kind))?;
                        Self::signal_ispu(bus)?;
                        Self::relay_tensor_info(bus, out)?;
                        Self::relay_tensor_info(bus, out)?;
                    }
                    Ok(())
                })?;
            }
            Command::Run => {
                self.run(out)?;
            }
            Command::Ucf { .. } | Command::Input { .. } => {
                bail!("{command:?} needs a payload")
            }
            Command::Unknown(line) => bail!("unknown command `{line}`"),
        }
        Ok(())
    }

    /// Feeds the payload of an upload command in `BLOCK_SIZE` chunks.
    pub fn upload<W: Write>(&mut self, command: &Command, payload: &[u8], out: &mut W) -> Result<()> {
        check_size(announced_size(command)?, payload)?;
        self.receive(command, payload, out)
    }

    /// Reads the announced payload of `command` from `source`. On failure
    /// the unread part is skipped.
    fn receive<R: Read, W: Write>(
        &mut self,
        command: &Command,
        source: R,
        out: &mut W,
    ) -> Result<()> {
        let size = usize::try_from(announced_size(command)?).context("payload size")?;
        let mut payload = Payload::new(source, size);
        let result = match *command {
            Command::Input { index, .. } => self.input_blocks(index, &mut payload, out),
            _ => self.ucf_blocks(&mut payload, out).map(|_| ()),
        };
        if result.is_err() {
            payload.discard()?;
        }
        result
    }

    /// Applies a packed UCF and reports the boot return code.
    pub fn load_ucf<W: Write>(&mut self, payload: &[u8], out: &mut W) -> Result<u32> {
        self.ucf_blocks(&mut Payload::new(payload, payload.len()), out)
    }

    fn ucf_blocks<R: Read, W: Write>(
        &mut self,
        payload: &mut Payload<R>,
        out: &mut W,
    ) -> Result<u32> {
        let mut ispu_page = false;
        while let Some(block) = payload.next_block(out)? {
            let ops = ucf::unpack(&block)?;
            self.apply_ucf_block(&ops, &mut ispu_page)?;
        }
        writeln!(out, "Loading completed.")?;

        let mut status = 0;
        if !self.wait_boot()? {
            status |= TIMEOUT_ERROR;
        }
        if self.stack_overflow()? {
            status |= STACK_ERROR;
        }

        let mut version = [0u8; 3];
        if status == 0 {
            self.bus
                .in_ispu_page(|bus| bus.read(reg::UCF_VERSION, &mut version))?;
            if version[..2] != EXPECTED_UCF_VERSION {
                status |= UCF_VERSION_ERROR;
            }
        }

        writeln!(out, "{status:#X}")?;
        if status & UCF_VERSION_ERROR != 0 {
            writeln!(out, "{}.{}.{}", version[0], version[1], version[2])?;
            writeln!(
                out,
                "{}.{}",
                EXPECTED_UCF_VERSION[0], EXPECTED_UCF_VERSION[1]
            )?;
        }
        Ok(status)
    }

    /// Consecutive memory-port writes in the ISPU page are sent as one burst.
    fn apply_ucf_block(&mut self, ops: &[UcfOp], ispu_page: &mut bool) -> Result<()> {
        let mut burst = Vec::new();
        for op in ops {
            match *op {
                UcfOp::Write { reg, value } if *ispu_page && reg == MEM_DATA_REG => {
                    burst.push(value);
                    continue;
                }
                _ => {}
            }

            if !burst.is_empty() {
                self.bus.write_mul(MEM_DATA_REG, &burst)?;
                burst.clear();
            }
            match *op {
                UcfOp::Write { reg, value } => {
                    if reg == PAGE_REG {
                        *ispu_page = value & PAGE_ISPU != 0;
                    }
                    self.bus.write(reg, value)?;
                }
                UcfOp::Wait { ms } => self.delay.delay_ms(u32::from(ms)),
            }
        }
        if !burst.is_empty() {
            self.bus.write_mul(MEM_DATA_REG, &burst)?;
        }
        Ok(())
    }

    /// Copies `payload` into input tensor `index`, block by block.
    pub fn load_input<W: Write>(&mut self, index: u32, payload: &[u8], out: &mut W) -> Result<()> {
        self.input_blocks(index, &mut Payload::new(payload, payload.len()), out)
    }

    fn input_blocks<R: Read, W: Write>(
        &mut self,
        index: u32,
        payload: &mut Payload<R>,
        out: &mut W,
    ) -> Result<()> {
        let buffer = self.bus.with_core_stopped(|bus| {
            let count = bus.read_u8(dout(table::N_INPUTS))?;
            if index >= u32::from(count) {
                bail!("input index {index} out of range ({count} inputs)");
            }
            let table_addr = bus.read_u32(dout(table::INPUTS))?;
            bus.read_mem_u32(table_addr + index * 4)
        })?;

        let mut offset = 0u32;
        while let Some(block) = payload.next_block(out)? {
            self.bus
                .with_core_stopped(|bus| bus.write_mem(buffer + offset, &block))?;
            offset += block.len() as u32;
        }
        writeln!(out, "Loading completed.")?;
        Ok(())
    }

    /// Runs the network once, relaying per-layer times as INT2 toggles, and
    /// streams the raw output tensors after INT1.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<RunReport> {
        let mut int2_high = pin_level(&mut self.int2, "INT2")?;
        writeln!(out, "Requested execution.")?;
        self.request(CMD_RUN)?;
        let start = self.clock.now_us();

        let mut report = RunReport::default();
        let mut timer = ExecTimer::default();
        loop {
            let now = self.clock.now_us();
            let level = pin_level(&mut self.int2, "INT2")?;
            if level != int2_high {
                int2_high = level;
                if let Some(layer_us) = timer.edge(level, now) {
                    writeln!(out, "{layer_us}")?;
                    report.layer_us.push(layer_us);
                }
            }
            if pin_level(&mut self.int1, "INT1")? {
                break;
            }
            if now - start > self.timeouts.run_us {
                report.status = TIMEOUT_ERROR;
                if self.stack_overflow()? {
                    report.status |= STACK_ERROR;
                }
                writeln!(out, "ret {:#X}", report.status)?;
                return Ok(report);
            }
            self.delay.delay_us(POLL_INTERVAL_US);
        }
        report.exec_us = timer.exec_us;

        self.bus.write(reg::CTRL1_ISPU, ISPU_OFF)?;
        self.delay.delay_ms(1);

        if self.stack_overflow()? {
            report.status |= STACK_ERROR;
        }
        writeln!(out, "ret {:#X}", report.status)?;
        if report.status != 0 {
            return Ok(report);
        }

        writeln!(out, "{}", report.exec_us)?;
        let (code, output_bytes) = self.bus.with_core_stopped(|bus| {
            let code = bus.read_u32(reg::DOUT_00)?;
            let count = bus.read_u8(dout(table::N_OUTPUTS))?;
            let buffers = bus.read_u32(dout(table::OUTPUTS))?;
            let sizes = bus.read_u32(dout(table::OUTPUT_SIZES))?;

            let mut total = 0usize;
            for i in 0..u32::from(count) {
                let mut addr = bus.read_mem_u32(buffers + i * 4)?;
                let mut remaining = bus.read_mem_u32(sizes + i * 4)? as usize;
                while remaining > 0 {
                    let mut chunk = vec![0u8; remaining.min(BLOCK_SIZE)];
                    bus.read_mem(addr, &mut chunk)?;
                    out.write_all(&chunk)?;
                    addr += chunk.len() as u32;
                    remaining -= chunk.len();
                    total += chunk.len();
                }
            }
            Ok((code, total))
        })?;
        report.engine_code = Some(code);
        report.output_bytes = output_bytes;
        Ok(report)
    }

    fn request(&mut self, flags: u8) -> Result<()> {
        self.bus
            .in_ispu_page(|bus| bus.write(reg::IF2S_FLAG, flags))?;
        self.bus.write(reg::CTRL1_ISPU, ISPU_WAKE)
    }

    fn wait_boot(&mut self) -> Result<bool> {
        let start = self.clock.now_us();
        let timeout = self.timeouts.boot_us;
        let Self {
            bus, clock, delay, ..
        } = self;
        bus.in_ispu_page(|bus| loop {
            if bus.read_u8(reg::ISPU_STATUS)? & BOOT_DONE != 0 {
                return Ok(true);
            }
            if clock.now_us() - start > timeout {
                return Ok(false);
            }
            delay.delay_us(POLL_INTERVAL_US);
        })
    }

    fn read_canary(&mut self) -> Result<(u32, u8)> {
        self.bus.with_core_stopped(|bus| {
            let addr = bus.read_u32(reg::CANARY_ADDR)?;
            let mut canary = [0u8; 1];
            bus.read_mem(addr, &mut canary)?;
            Ok((addr, canary[0]))
        })
    }

    fn stack_overflow(&mut self) -> Result<bool> {
        let (_, canary) = self.read_canary()?;
        Ok(canary != CANARY)
    }

    fn relay_sizes<W: Write>(&mut self, count_at: u32, table_at: u32, out: &mut W) -> Result<()> {
        self.bus.in_ispu_page(|bus| {
            let count = bus.read_u8(dout(count_at))?;
            writeln!(out, "{count}")?;
            let sizes = bus.read_u32(dout(table_at))?;
            for i in 0..u32::from(count) {
                writeln!(out, "{}", bus.read_mem_u32(sizes + i * 4)?)?;
            }
            Ok(())
        })
    }

    fn wait_ispu(bus: &mut SensorBus<I>) -> Result<()> {
        for _ in 0..MAX_S2IF_POLLS {
            if bus.read_u8(reg::S2IF_FLAG)? != 0 {
                return Ok(());
            }
        }
        bail!("ISPU stopped answering after {MAX_S2IF_POLLS} polls")
    }

    fn signal_ispu(bus: &mut SensorBus<I>) -> Result<()> {
        bus.write(reg::S2IF_FLAG, 0x01)
    }

    fn next_u32(bus: &mut SensorBus<I>) -> Result<u32> {
        Self::wait_ispu(bus)?;
        let value = bus.read_u32(reg::DOUT_00)?;
        Self::signal_ispu(bus)?;
        Ok(value)
    }

    fn next_u16(bus: &mut SensorBus<I>) -> Result<u16> {
        Self::wait_ispu(bus)?;
        let mut buf = [0u8; 2];
        bus.read(reg::DOUT_00, &mut buf)?;
        Self::signal_ispu(bus)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Relays one tensor-info stream. Scales are forwarded as raw `f32`
    /// bytes; everything else as text lines.
    fn relay_tensor_info<W: Write>(bus: &mut SensorBus<I>, out: &mut W) -> Result<()> {
        let count = Self::next_u16(bus)?;
        writeln!(out, "{count}")?;
        for _ in 0..count {
            writeln!(out, "{:#X}", Self::next_u32(bus)?)?;

            let dims = Self::next_u32(bus)?;
            writeln!(out, "{dims}")?;
            for _ in 0..dims {
                writeln!(out, "{}", Self::next_u32(bus)? as i32)?;
            }

            let scales = Self::next_u32(bus)?;
            writeln!(out, "{scales}")?;
            for _ in 0..scales {
                out.write_all(&Self::next_u32(bus)?.to_le_bytes())?;
            }

            let zero_points = Self::next_u32(bus)?;
            writeln!(out, "{zero_points}")?;
            for _ in 0..zero_points {
                writeln!(out, "{}", Self::next_u16(bus)? as i16)?;
            }

            let name_len = Self::next_u32(bus)? as usize;
            writeln!(out, "{name_len}")?;
            if name_len > 0 {
                let mut name = Vec::with_capacity(name_len + 3);
                for _ in 0..name_len.div_ceil(4) {
                    name.extend_from_slice(&Self::next_u32(bus)?.to_le_bytes());
                }
                name.truncate(name_len);
                writeln!(out, "{}", String::from_utf8_lossy(&name))?;
            }
        }
        Ok(())
    }
}

fn pin_level<P: InputPin>(pin: &mut P, name: &str) -> Result<bool> {
    pin.is_high().map_err(|err| anyhow!("{name}: {err:?}"))
}

fn announced_size(command: &Command) -> Result<u32> {
    match *command {
        Command::Ucf { size } | Command::Input { size, .. } => Ok(size),
        _ => bail!("{command:?} takes no payload"),
    }
}

fn check_size(size: u32, payload: &[u8]) -> Result<()> {
    let expected = usize::try_from(size).context("payload size")?;
    if payload.len() != expected {
        bail!(
            "payload is {} bytes, command announced {expected}",
            payload.len()
        );
    }
    Ok(())
}
