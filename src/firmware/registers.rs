//! ISPU register window and typed access to it.
//!
//! Addresses are absolute. Multi-byte registers are little-endian and may sit
//! at odd offsets (the validation table packs fields back to back), so the
//! provided accessors compose wider values from byte accesses unless an
//! implementation overrides them.

use core::ptr;

pub const CTRL_BASE: u32 = 0x6800;
pub const EXT_BASE: u32 = 0x6900;

pub const GLB_CALL_EN: u32 = CTRL_BASE;
pub const CONFIG: u32 = CTRL_BASE + 0x02;
pub const STATUS: u32 = CTRL_BASE + 0x04;
pub const IF2S_FLAG: u32 = CTRL_BASE + 0x0C;
pub const S2IF_FLAG: u32 = CTRL_BASE + 0x0E;
pub const DOUT_00: u32 = CTRL_BASE + 0x10;
pub const DOUT_COUNT: u32 = 32;
pub const INT1_CTRL: u32 = CTRL_BASE + 0x50;
pub const INT2_CTRL: u32 = CTRL_BASE + 0x54;
pub const INT_STATUS: u32 = CTRL_BASE + 0x58;
pub const INT_PIN: u32 = CTRL_BASE + 0x5C;
pub const ALGO: u32 = CTRL_BASE + 0x70;
pub const ARAW_X: u32 = CTRL_BASE + 0x80;
pub const ARAW_Y: u32 = CTRL_BASE + 0x84;
pub const ARAW_Z: u32 = CTRL_BASE + 0x88;
pub const GRAW_X: u32 = CTRL_BASE + 0x8C;
pub const GRAW_Y: u32 = CTRL_BASE + 0x90;
pub const GRAW_Z: u32 = CTRL_BASE + 0x94;
pub const ERAW_0: u32 = CTRL_BASE + 0x98;
pub const ERAW_1: u32 = CTRL_BASE + 0x9C;
pub const ERAW_2: u32 = CTRL_BASE + 0xA0;
pub const TEMP: u32 = CTRL_BASE + 0xA4;
pub const CALL_EN: u32 = CTRL_BASE + 0xB8;

pub const DTIME_0: u32 = EXT_BASE + 0x48;
pub const DTIME_1: u32 = EXT_BASE + 0x4A;

/// `STATUS` bit the host polls to know the image finished booting.
pub const BOOT_DONE: u8 = 0x04;

/// Output register `DOUT_<n>`; consecutive registers are two bytes apart.
pub const fn dout(n: u32) -> u32 {
    DOUT_00 + 2 * n
}

pub const DOUT_END: u32 = DOUT_00 + 2 * DOUT_COUNT;

/// Typed access to the register window.
///
/// Reads take `&mut self` because a read is observable on real hardware
/// (and test peers count polls).
pub trait RegisterFile {
    fn read_u8(&mut self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, value: u8);

    fn read_u16(&mut self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr + 1)])
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_u8(addr + i as u32, byte);
        }
    }

    fn read_u32(&mut self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_u8(addr + i as u32);
        }
        u32::from_le_bytes(bytes)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_u8(addr + i as u32, byte);
        }
    }

    fn read_i16(&mut self, addr: u32) -> i16 {
        self.read_u16(addr) as i16
    }

    fn write_i16(&mut self, addr: u32, value: i16) {
        self.write_u16(addr, value as u16);
    }

    fn read_i32(&mut self, addr: u32) -> i32 {
        self.read_u32(addr) as i32
    }

    fn write_i32(&mut self, addr: u32, value: i32) {
        self.write_u32(addr, value as u32);
    }

    fn read_f32(&mut self, addr: u32) -> f32 {
        f32::from_bits(self.read_u32(addr))
    }

    fn write_f32(&mut self, addr: u32, value: f32) {
        self.write_u32(addr, value.to_bits());
    }

    fn read_u64(&mut self, addr: u32) -> u64 {
        u64::from(self.read_u32(addr)) | (u64::from(self.read_u32(addr + 4)) << 32)
    }

    fn write_u64(&mut self, addr: u32, value: u64) {
        self.write_u32(addr, value as u32);
        self.write_u32(addr + 4, (value >> 32) as u32);
    }

    fn or_u8(&mut self, addr: u32, mask: u8) {
        let value = self.read_u8(addr);
        self.write_u8(addr, value | mask);
    }

    fn and_u8(&mut self, addr: u32, mask: u8) {
        let value = self.read_u8(addr);
        self.write_u8(addr, value & mask);
    }
}

/// Reads the three raw accelerometer axes and scales them to g.
pub fn read_accel<R: RegisterFile + ?Sized>(regs: &mut R, sens: f32) -> [f32; 3] {
    [
        f32::from(regs.read_i16(ARAW_X)) * sens,
        f32::from(regs.read_i16(ARAW_Y)) * sens,
        f32::from(regs.read_i16(ARAW_Z)) * sens,
    ]
}

/// Sequential writer over the output registers, starting at `DOUT_00` for
/// the per-image layouts.
pub struct OutputWriter<'r, R: RegisterFile + ?Sized> {
    regs: &'r mut R,
    addr: u32,
}

impl<'r, R: RegisterFile + ?Sized> OutputWriter<'r, R> {
    pub fn new(regs: &'r mut R) -> Self {
        Self::at(regs, DOUT_00)
    }

    pub fn at(regs: &'r mut R, addr: u32) -> Self {
        Self { regs, addr }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.regs.write_f32(self.addr, value);
        self.addr += 4;
        self
    }

    pub fn put_f32s(&mut self, values: &[f32]) -> &mut Self {
        for value in values {
            self.put_f32(*value);
        }
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.regs.write_u8(self.addr, value);
        self.addr += 1;
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.regs.write_u32(self.addr, value);
        self.addr += 4;
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.regs.write_u64(self.addr, value);
        self.addr += 8;
        self
    }
}

const RAM_WINDOW_LEN: usize = 0x200;

/// In-memory register window covering `CTRL_BASE..EXT_BASE + 0x100`.
///
/// Values only change when written, so every read within a tick observes the
/// same sample. Used by host builds and tests.
#[derive(Clone)]
pub struct RamRegisterFile {
    bytes: [u8; RAM_WINDOW_LEN],
}

impl Default for RamRegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RamRegisterFile {
    pub const fn new() -> Self {
        Self {
            bytes: [0; RAM_WINDOW_LEN],
        }
    }

    pub fn with_u8(mut self, addr: u32, value: u8) -> Self {
        self.write_u8(addr, value);
        self
    }

    pub fn with_u16(mut self, addr: u32, value: u16) -> Self {
        self.write_u16(addr, value);
        self
    }

    pub fn with_u32(mut self, addr: u32, value: u32) -> Self {
        self.write_u32(addr, value);
        self
    }

    pub fn set_accel_raw(&mut self, raw: [i16; 3]) {
        self.write_i16(ARAW_X, raw[0]);
        self.write_i16(ARAW_Y, raw[1]);
        self.write_i16(ARAW_Z, raw[2]);
    }

    /// # Panics
    ///
    /// Panics when `addr` is outside the modelled window.
    fn index(addr: u32) -> usize {
        let offset = addr
            .checked_sub(CTRL_BASE)
            .map(|offset| offset as usize)
            .filter(|offset| *offset < RAM_WINDOW_LEN);
        match offset {
            Some(offset) => offset,
            None => panic!("register address {addr:#06x} outside ISPU window"),
        }
    }
}

impl RegisterFile for RamRegisterFile {
    fn read_u8(&mut self, addr: u32) -> u8 {
        self.bytes[Self::index(addr)]
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        self.bytes[Self::index(addr)] = value;
    }
}

/// Volatile access to the device register window.
pub struct MmioRegisterFile {
    _private: (),
}

impl MmioRegisterFile {
    /// # Safety
    ///
    /// Only valid on the ISPU core, where `CTRL_BASE..EXT_BASE + 0x100` is
    /// mapped to the sensor registers. At most one instance may exist.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterFile for MmioRegisterFile {
    fn read_u8(&mut self, addr: u32) -> u8 {
        // SAFETY: `new` guarantees the window is mapped.
        unsafe { ptr::read_volatile(addr as usize as *const u8) }
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        // SAFETY: `new` guarantees the window is mapped.
        unsafe { ptr::write_volatile(addr as usize as *mut u8, value) }
    }

    fn read_u16(&mut self, addr: u32) -> u16 {
        if addr % 2 != 0 {
            return u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr + 1)]);
        }
        // SAFETY: mapped and aligned.
        unsafe { ptr::read_volatile(addr as usize as *const u16) }
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        if addr % 2 != 0 {
            let [lo, hi] = value.to_le_bytes();
            self.write_u8(addr, lo);
            self.write_u8(addr + 1, hi);
            return;
        }
        // SAFETY: mapped and aligned.
        unsafe { ptr::write_volatile(addr as usize as *mut u16, value) }
    }

    fn read_u32(&mut self, addr: u32) -> u32 {
        if addr % 4 != 0 {
            let lo = u32::from(self.read_u16(addr));
            let hi = u32::from(self.read_u16(addr + 2));
            return lo | (hi << 16);
        }
        // SAFETY: mapped and aligned.
        unsafe { ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        if addr % 4 != 0 {
            self.write_u16(addr, value as u16);
            self.write_u16(addr + 2, (value >> 16) as u16);
            return;
        }
        // SAFETY: mapped and aligned.
        unsafe { ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}
