use std::{boxed::Box, vec, vec::Vec};

use super::*;

pub(crate) const FORMAT_FLOAT32: u32 = 0x0082_1040;

pub(crate) static MOCK_INPUTS: [TensorInfo; 1] = [TensorInfo {
    name: "input_1",
    format: FORMAT_FLOAT32,
    shape: &[1, 9],
    scale: &[],
    zero_point: &[],
}];

pub(crate) static MOCK_OUTPUTS: [TensorInfo; 1] = [TensorInfo {
    name: "",
    format: FORMAT_FLOAT32,
    shape: &[1, 4],
    scale: &[0.5],
    zero_point: &[-3],
}];

pub(crate) static MOCK_NODES: [NodeInfo; 1] = [NodeInfo {
    id: 0,
    kind: 7,
    inputs: &MOCK_INPUTS,
    outputs: &MOCK_OUTPUTS,
}];

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum MockCall {
    Init,
    Run,
    Buffers(BufferClass),
    SetBuffers(BufferClass, usize),
}

/// Scripted engine. Owned classes live in leaked, word-aligned storage.
pub(crate) struct MockEngine {
    capabilities: Capabilities,
    layout: NetworkLayout,
    inputs_in_activations: bool,
    calls: core::cell::RefCell<Vec<MockCall>>,
    owned: [Option<BufferList>; 4],
    bound: [Option<BufferList>; 4],
    initialized: bool,
    run_result: Result<(), EngineError>,
    scripted_outputs: Vec<f32>,
    last_inputs: Vec<f32>,
    with_nodes: bool,
    set_error: Option<(BufferClass, EngineError)>,
}

fn slot(class: BufferClass) -> usize {
    match class {
        BufferClass::Activations => 0,
        BufferClass::Inputs => 1,
        BufferClass::Outputs => 2,
        BufferClass::States => 3,
    }
}

fn leak_words(bytes: u32) -> BufferAddr {
    let words = (bytes as usize).div_ceil(4).max(1);
    let memory: &'static mut [u32] = Box::leak(vec![0u32; words].into_boxed_slice());
    NonNull::from(memory).cast()
}

pub(crate) fn leak_arena(len: usize) -> Arena {
    Arena::new(Box::leak(vec![0u8; len].into_boxed_slice()))
}

impl MockEngine {
    pub(crate) fn new(layout: NetworkLayout) -> Self {
        Self {
            capabilities: Capabilities::NONE,
            layout,
            inputs_in_activations: false,
            calls: core::cell::RefCell::new(Vec::new()),
            owned: [None, None, None, None],
            bound: [None, None, None, None],
            initialized: false,
            run_result: Ok(()),
            scripted_outputs: Vec::new(),
            last_inputs: Vec::new(),
            with_nodes: false,
            set_error: None,
        }
    }

    pub(crate) fn owning(mut self, class: BufferClass) -> Self {
        self.capabilities = self.capabilities.owning(class);
        let mut list = BufferList::new();
        for size in self.layout.class(class).sizes {
            let _ = list.push(leak_words(*size));
        }
        self.owned[slot(class)] = Some(list);
        self
    }

    /// Engine-owned inputs point into the first activation buffer, which
    /// must therefore be bound first.
    pub(crate) fn with_inputs_in_activations(mut self) -> Self {
        self.capabilities = self.capabilities.owning(BufferClass::Inputs);
        self.inputs_in_activations = true;
        self
    }

    pub(crate) fn with_outputs(mut self, outputs: &[f32]) -> Self {
        self.scripted_outputs = outputs.to_vec();
        self
    }

    pub(crate) fn with_run_result(mut self, result: Result<(), EngineError>) -> Self {
        self.run_result = result;
        self
    }

    pub(crate) fn with_nodes(mut self) -> Self {
        self.with_nodes = true;
        self
    }

    pub(crate) fn with_set_error(mut self, class: BufferClass, error: EngineError) -> Self {
        self.set_error = Some((class, error));
        self
    }

    pub(crate) fn calls(&self) -> Vec<MockCall> {
        self.calls.borrow().clone()
    }

    pub(crate) fn last_inputs(&self) -> &[f32] {
        &self.last_inputs
    }

    fn record(&self, call: MockCall) {
        self.calls.borrow_mut().push(call);
    }

    fn current(&self, class: BufferClass) -> Option<&BufferList> {
        if class == BufferClass::Inputs && self.inputs_in_activations {
            return self.bound[slot(BufferClass::Activations)].as_ref();
        }
        self.owned[slot(class)]
            .as_ref()
            .or(self.bound[slot(class)].as_ref())
    }
}

unsafe impl NetworkEngine for MockEngine {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn layout(&self) -> NetworkLayout {
        self.layout
    }

    fn init(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::Init);
        self.initialized = true;
        Ok(())
    }

    fn run(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::Run);
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }

        let input = self.current(BufferClass::Inputs).and_then(|l| l.first().copied());
        let input_len = self.layout.inputs.sizes.first().copied().unwrap_or(0) as usize / 4;
        self.last_inputs = match input {
            // SAFETY: bound buffers are at least as large as the layout says.
            Some(addr) => (0..input_len)
                .map(|i| unsafe { addr.as_ptr().add(i * 4).cast::<f32>().read_unaligned() })
                .collect(),
            None => Vec::new(),
        };

        if let Some(addr) = self.current(BufferClass::Outputs).and_then(|l| l.first().copied()) {
            let output_len = self.layout.outputs.sizes.first().copied().unwrap_or(0) as usize / 4;
            for (i, value) in self.scripted_outputs.iter().take(output_len).enumerate() {
                // SAFETY: index bounded by the layout size.
                unsafe { addr.as_ptr().add(i * 4).cast::<f32>().write_unaligned(*value) };
            }
        }

        self.run_result
    }

    fn buffers(&self, class: BufferClass) -> Result<BufferList, EngineError> {
        self.record(MockCall::Buffers(class));
        if class == BufferClass::Inputs && self.inputs_in_activations {
            let activations = self.bound[slot(BufferClass::Activations)]
                .as_ref()
                .ok_or(EngineError::NotInitialized)?;
            let base = activations.first().copied().ok_or(EngineError::NotInitialized)?;
            let mut list = BufferList::new();
            let _ = list.push(base);
            return Ok(list);
        }
        self.owned[slot(class)]
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    fn set_buffers(
        &mut self,
        class: BufferClass,
        addrs: &[BufferAddr],
    ) -> Result<(), EngineError> {
        self.record(MockCall::SetBuffers(class, addrs.len()));
        if let Some((failing, error)) = self.set_error {
            if failing == class {
                return Err(error);
            }
        }
        let layout = self.layout.class(class);
        if addrs.len() != layout.len() {
            return Err(EngineError::InvalidBufferCount);
        }
        for (index, addr) in addrs.iter().enumerate() {
            if addr.as_ptr() as usize % usize::from(layout.alignment(index)) != 0 {
                return Err(EngineError::InvalidBufferAlignment);
            }
        }
        let mut list = BufferList::new();
        for addr in addrs {
            let _ = list.push(*addr);
        }
        self.bound[slot(class)] = Some(list);
        Ok(())
    }

    fn info(&self) -> NetworkInfo {
        NetworkInfo {
            name: c"mock_net",
            macc: 2938,
            runtime_version: Version {
                major: 1,
                minor: 2,
                micro: 3,
            },
            tool_version: Version {
                major: 2,
                minor: 1,
                micro: 0,
            },
        }
    }

    fn input_info(&self) -> &'static [TensorInfo] {
        &MOCK_INPUTS
    }

    fn output_info(&self) -> &'static [TensorInfo] {
        &MOCK_OUTPUTS
    }

    fn nodes(&self) -> &'static [NodeInfo] {
        if self.with_nodes {
            &MOCK_NODES
        } else {
            &[]
        }
    }
}
