use core::ptr::NonNull;

use super::{
    BufferAddr, BufferClass, BufferList, ClassLayout, EngineError, NetworkEngine, MAX_BUFFERS,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindError {
    Engine {
        class: BufferClass,
        error: EngineError,
    },
    MissingArena(BufferClass),
    ArenaExhausted {
        class: BufferClass,
        index: usize,
    },
    /// The engine returned a different number of buffers than its layout
    /// declares, or the layout exceeds `MAX_BUFFERS`.
    CountMismatch(BufferClass),
}

/// One bound tensor buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TensorBuffer {
    addr: BufferAddr,
    len: u32,
}

impl TensorBuffer {
    pub fn addr(&self) -> BufferAddr {
        self.addr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address as seen by the host over the sensor bus. Pointers are 32-bit
    /// on the ISPU core.
    pub fn device_addr(&self) -> u32 {
        self.addr.as_ptr() as usize as u32
    }

    pub fn f32_len(&self) -> usize {
        self.len as usize / 4
    }

    #[must_use]
    pub fn store_f32(&self, index: usize, value: f32) -> bool {
        if index >= self.f32_len() {
            return false;
        }
        // SAFETY: in bounds; buffers are valid for `len` bytes for the whole
        // program (arena memory is 'static, engine memory per the
        // `NetworkEngine` contract). Unaligned writes are allowed.
        unsafe {
            self.addr
                .as_ptr()
                .add(index * 4)
                .cast::<f32>()
                .write_unaligned(value)
        };
        true
    }

    pub fn load_f32(&self, index: usize) -> Option<f32> {
        if index >= self.f32_len() {
            return None;
        }
        // SAFETY: see `store_f32`.
        Some(unsafe {
            self.addr
                .as_ptr()
                .add(index * 4)
                .cast::<f32>()
                .read_unaligned()
        })
    }
}

/// Caller-owned storage for one buffer class, handed out front to back.
pub struct Arena {
    base: NonNull<u8>,
    len: usize,
    next: usize,
}

impl Arena {
    pub fn new(memory: &'static mut [u8]) -> Self {
        Self {
            len: memory.len(),
            base: NonNull::from(memory).cast(),
            next: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.len - self.next
    }

    /// Reserves `size` bytes whose absolute address is a multiple of `align`.
    pub fn bump(&mut self, size: u32, align: u8) -> Option<TensorBuffer> {
        let align = usize::from(align.max(1));
        let base = self.base.as_ptr() as usize;

        let mut curr = base + self.next;
        let rem = curr % align;
        if rem != 0 {
            curr += align - rem;
        }

        let offset = curr - base;
        let end = offset.checked_add(size as usize)?;
        if end > self.len {
            return None;
        }
        self.next = end;

        // SAFETY: `offset <= len`, so the pointer stays inside the arena.
        let addr = unsafe { self.base.add(offset) };
        Some(TensorBuffer { addr, len: size })
    }
}

#[derive(Default)]
pub struct Arenas {
    pub activations: Option<Arena>,
    pub inputs: Option<Arena>,
    pub outputs: Option<Arena>,
    pub states: Option<Arena>,
}

impl Arenas {
    fn get_mut(&mut self, class: BufferClass) -> Option<&mut Arena> {
        match class {
            BufferClass::Activations => self.activations.as_mut(),
            BufferClass::Inputs => self.inputs.as_mut(),
            BufferClass::Outputs => self.outputs.as_mut(),
            BufferClass::States => self.states.as_mut(),
        }
    }
}

/// Buffers of one class plus the 32-bit address table the host reads.
#[derive(Clone, Debug, Default)]
pub struct BoundClass {
    buffers: heapless::Vec<TensorBuffer, MAX_BUFFERS>,
    device_addrs: [u32; MAX_BUFFERS],
}

impl BoundClass {
    fn push(&mut self, buffer: TensorBuffer) -> Result<(), TensorBuffer> {
        let index = self.buffers.len();
        self.buffers.push(buffer)?;
        self.device_addrs[index] = buffer.device_addr();
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&TensorBuffer> {
        self.buffers.get(index)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TensorBuffer> {
        self.buffers.iter()
    }

    /// Device address of the address table itself. Only meaningful once the
    /// set has reached its final location.
    pub fn address_table(&self) -> u32 {
        self.device_addrs.as_ptr() as usize as u32
    }
}

#[derive(Clone, Debug, Default)]
pub struct BoundBuffers {
    pub activations: BoundClass,
    pub inputs: BoundClass,
    pub outputs: BoundClass,
    pub states: BoundClass,
}

impl BoundBuffers {
    pub fn class(&self, class: BufferClass) -> &BoundClass {
        match class {
            BufferClass::Activations => &self.activations,
            BufferClass::Inputs => &self.inputs,
            BufferClass::Outputs => &self.outputs,
            BufferClass::States => &self.states,
        }
    }

    fn class_mut(&mut self, class: BufferClass) -> &mut BoundClass {
        match class {
            BufferClass::Activations => &mut self.activations,
            BufferClass::Inputs => &mut self.inputs,
            BufferClass::Outputs => &mut self.outputs,
            BufferClass::States => &mut self.states,
        }
    }
}

fn query_owned<E: NetworkEngine + ?Sized>(
    engine: &E,
    class: BufferClass,
    layout: &ClassLayout,
) -> Result<BoundClass, BindError> {
    let addrs = engine
        .buffers(class)
        .map_err(|error| BindError::Engine { class, error })?;
    if addrs.len() != layout.len() {
        return Err(BindError::CountMismatch(class));
    }

    let mut bound = BoundClass::default();
    for (addr, size) in addrs.iter().zip(layout.sizes) {
        bound
            .push(TensorBuffer {
                addr: *addr,
                len: *size,
            })
            .map_err(|_| BindError::CountMismatch(class))?;
    }
    Ok(bound)
}

fn allocate_and_set<E: NetworkEngine + ?Sized>(
    engine: &mut E,
    arena: &mut Arena,
    class: BufferClass,
    layout: &ClassLayout,
) -> Result<BoundClass, BindError> {
    let mut bound = BoundClass::default();
    let mut addrs = BufferList::new();
    for (index, size) in layout.sizes.iter().enumerate() {
        let buffer = arena
            .bump(*size, layout.alignment(index))
            .ok_or(BindError::ArenaExhausted { class, index })?;
        bound
            .push(buffer)
            .map_err(|_| BindError::CountMismatch(class))?;
        addrs
            .push(buffer.addr())
            .map_err(|_| BindError::CountMismatch(class))?;
    }

    engine
        .set_buffers(class, &addrs)
        .map_err(|error| BindError::Engine { class, error })?;
    Ok(bound)
}

/// Binds every buffer class the network declares, in
/// [`BufferClass::BIND_ORDER`].
///
/// Engine-owned classes are queried; the rest are carved out of `arenas`
/// and handed to the engine. States are skipped when the network has none.
pub fn init_buffers<E: NetworkEngine + ?Sized>(
    engine: &mut E,
    arenas: &mut Arenas,
) -> Result<BoundBuffers, BindError> {
    let capabilities = engine.capabilities();
    let layout = engine.layout();
    let mut bound = BoundBuffers::default();

    for class in BufferClass::BIND_ORDER {
        let class_layout = layout.class(class);
        if class == BufferClass::States && class_layout.is_empty() {
            continue;
        }

        let set = if capabilities.owns(class) {
            query_owned(engine, class, &class_layout)?
        } else {
            let arena = arenas
                .get_mut(class)
                .ok_or(BindError::MissingArena(class))?;
            allocate_and_set(engine, arena, class, &class_layout)?
        };

        log::debug!(
            "inference: bound class={} count={} engine_owned={}",
            class.name(),
            set.len(),
            capabilities.owns(class)
        );
        *bound.class_mut(class) = set;
    }

    Ok(bound)
}
