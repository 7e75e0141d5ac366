//! Interface to a pre-compiled inference engine and the lifecycle of its
//! tensor buffers.

use core::ffi::CStr;
use core::ptr::NonNull;

mod buffers;
#[cfg(test)]
pub(crate) mod mock;

pub use buffers::{
    init_buffers, Arena, Arenas, BindError, BoundBuffers, BoundClass, TensorBuffer,
};

/// Upper bound on buffers per class.
pub const MAX_BUFFERS: usize = 8;

pub type BufferAddr = NonNull<u8>;
pub type BufferList = heapless::Vec<BufferAddr, MAX_BUFFERS>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferClass {
    Activations,
    Inputs,
    Outputs,
    States,
}

impl BufferClass {
    /// Activations go first: engine-owned inputs and outputs may live inside
    /// the activation arena.
    pub const BIND_ORDER: [Self; 4] = [
        Self::Activations,
        Self::Inputs,
        Self::Outputs,
        Self::States,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::Activations => 0x01,
            Self::Inputs => 0x02,
            Self::Outputs => 0x04,
            Self::States => 0x08,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Activations => "activations",
            Self::Inputs => "inputs",
            Self::Outputs => "outputs",
            Self::States => "states",
        }
    }
}

/// Classes whose storage the engine allocates itself.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);

    pub const fn owning(self, class: BufferClass) -> Self {
        Self(self.0 | class.bit())
    }

    pub const fn owns(self, class: BufferClass) -> bool {
        self.0 & class.bit() != 0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClassLayout {
    pub sizes: &'static [u32],
    /// Per-buffer byte alignment; 0 is treated as 1.
    pub alignments: &'static [u8],
}

impl ClassLayout {
    pub const EMPTY: Self = Self {
        sizes: &[],
        alignments: &[],
    };

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn alignment(&self, index: usize) -> u8 {
        self.alignments.get(index).copied().unwrap_or(1).max(1)
    }

    pub fn total_bytes(&self) -> u32 {
        self.sizes.iter().sum()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NetworkLayout {
    pub activations: ClassLayout,
    pub inputs: ClassLayout,
    pub outputs: ClassLayout,
    pub states: ClassLayout,
    pub weight_sizes: &'static [u32],
}

impl NetworkLayout {
    pub fn class(&self, class: BufferClass) -> ClassLayout {
        match class {
            BufferClass::Activations => self.activations,
            BufferClass::Inputs => self.inputs,
            BufferClass::Outputs => self.outputs,
            BufferClass::States => self.states,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct NetworkInfo {
    /// NUL-terminated so the host can read it straight from memory.
    pub name: &'static CStr,
    pub macc: u64,
    pub runtime_version: Version,
    pub tool_version: Version,
}

#[derive(Clone, Copy, Debug)]
pub struct TensorInfo {
    pub name: &'static str,
    pub format: u32,
    pub shape: &'static [i32],
    pub scale: &'static [f32],
    pub zero_point: &'static [i16],
}

#[derive(Clone, Copy, Debug)]
pub struct NodeInfo {
    pub id: i32,
    pub kind: i16,
    pub inputs: &'static [TensorInfo],
    pub outputs: &'static [TensorInfo],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineError {
    NotInitialized,
    InvalidBufferCount,
    InvalidBufferAlignment,
    InvalidBufferSize,
    Runtime(u32),
}

impl EngineError {
    /// Value reported to the host in `DOUT_00` after a run.
    pub const fn code(self) -> u32 {
        match self {
            Self::NotInitialized => 0x20,
            Self::InvalidBufferCount => 0x21,
            Self::InvalidBufferAlignment => 0x22,
            Self::InvalidBufferSize => 0x23,
            Self::Runtime(code) => code,
        }
    }
}

pub const RETURN_OK: u32 = 0;

pub fn return_code(result: Result<(), EngineError>) -> u32 {
    match result {
        Ok(()) => RETURN_OK,
        Err(err) => err.code(),
    }
}

/// A compiled network.
///
/// # Safety
///
/// Every address returned by [`NetworkEngine::buffers`] must stay valid for
/// reads and writes of the matching [`NetworkLayout`] size for the rest of
/// the program, and the engine must only touch caller-owned buffers while
/// one of its own methods runs.
pub unsafe trait NetworkEngine {
    fn capabilities(&self) -> Capabilities;
    fn layout(&self) -> NetworkLayout;

    fn init(&mut self) -> Result<(), EngineError>;
    fn run(&mut self) -> Result<(), EngineError>;

    /// Engine-owned buffers of `class`.
    fn buffers(&self, class: BufferClass) -> Result<BufferList, EngineError>;
    /// Hands caller-owned storage for `class` to the engine.
    fn set_buffers(&mut self, class: BufferClass, addrs: &[BufferAddr])
        -> Result<(), EngineError>;

    fn info(&self) -> NetworkInfo;
    fn input_info(&self) -> &'static [TensorInfo];
    fn output_info(&self) -> &'static [TensorInfo];

    fn nodes(&self) -> &'static [NodeInfo] {
        &[]
    }
}
