//! Sensor register access over I2C, including the indirect ISPU memory port.

use anyhow::{anyhow, Result};
use embedded_hal::i2c::I2c;

/// 7-bit address with SA0 high.
pub const SENSOR_ADDR: u8 = 0x6A;
pub const WHO_AM_I_VALUE: u8 = 0x22;

pub mod reg {
    pub const FUNC_CFG_ACCESS: u8 = 0x01;
    pub const WHO_AM_I: u8 = 0x0F;
    pub const CTRL3_C: u8 = 0x12;
    /// Main page: ISPU power and wake-up control.
    pub const CTRL1_ISPU: u8 = 0x18;
    pub const CTRL10_C: u8 = 0x19;

    // ISPU page; offsets mirror the image's control window.
    pub const ISPU_CLOCK: u8 = 0x02;
    pub const ISPU_STATUS: u8 = 0x04;
    pub const MEM_SEL_H: u8 = 0x08;
    pub const MEM_SEL_M: u8 = 0x09;
    pub const MEM_SEL_L: u8 = 0x0A;
    pub const MEM_DATA: u8 = 0x0B;
    pub const IF2S_FLAG: u8 = 0x0C;
    pub const S2IF_FLAG: u8 = 0x0E;
    pub const DOUT_00: u8 = 0x10;
    pub const UCF_VERSION: u8 = 0x49;
    pub const CANARY_ADDR: u8 = 0x4C;
}

pub const PAGE_MAIN: u8 = 0x00;
pub const PAGE_ISPU: u8 = 0x80;
pub const CLOCK_STOPPED: u8 = 0x03;
pub const CLOCK_RUNNING: u8 = 0x01;
pub const ISPU_WAKE: u8 = 0xA0;
pub const ISPU_OFF: u8 = 0x00;
const MEM_READ: u8 = 0x40;

pub struct SensorBus<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> SensorBus<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: SENSOR_ADDR,
        }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    pub fn i2c(&self) -> &I {
        &self.i2c
    }

    pub fn read(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(|err| anyhow!("i2c read reg {reg:#04x}: {err:?}"))
    }

    pub fn read_u8(&mut self, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(reg, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self, reg: u8) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(reg, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        self.write_mul(reg, &[value])
    }

    pub fn write_mul(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.i2c
            .write(self.address, &frame)
            .map_err(|err| anyhow!("i2c write reg {reg:#04x}: {err:?}"))
    }

    /// Runs `f` with the ISPU register page selected.
    pub fn in_ispu_page<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.write(reg::FUNC_CFG_ACCESS, PAGE_ISPU)?;
        let result = f(self);
        self.write(reg::FUNC_CFG_ACCESS, PAGE_MAIN)?;
        result
    }

    /// Runs `f` in the ISPU page with the core clock stopped, as required
    /// for memory port access.
    pub fn with_core_stopped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.in_ispu_page(|bus| {
            bus.write(reg::ISPU_CLOCK, CLOCK_STOPPED)?;
            let result = f(bus);
            bus.write(reg::ISPU_CLOCK, CLOCK_RUNNING)?;
            result
        })
    }

    fn select_mem(&mut self, addr: u32, mode: u8) -> Result<()> {
        let [low, mid, high, _] = addr.to_le_bytes();
        self.write(reg::MEM_SEL_H, high | mode)?;
        self.write(reg::MEM_SEL_M, mid)?;
        self.write(reg::MEM_SEL_L, low)
    }

    /// Reads ISPU memory. Must run inside [`Self::with_core_stopped`].
    pub fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.select_mem(addr, MEM_READ)?;
        // the first byte after an address change is stale
        let mut stale = [0u8; 1];
        self.read(reg::MEM_DATA, &mut stale)?;
        self.read(reg::MEM_DATA, buf)
    }

    pub fn read_mem_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_mem(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated string of at most `max` bytes from ISPU memory.
    pub fn read_mem_cstr(&mut self, addr: u32, max: usize) -> Result<Vec<u8>> {
        self.select_mem(addr, MEM_READ)?;
        self.read_u8(reg::MEM_DATA)?;
        let mut bytes = Vec::new();
        while bytes.len() < max {
            match self.read_u8(reg::MEM_DATA)? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        Ok(bytes)
    }

    /// Writes ISPU memory. Must run inside [`Self::with_core_stopped`].
    pub fn write_mem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.select_mem(addr, 0)?;
        self.write_mul(reg::MEM_DATA, data)
    }
}
