//! # errors of the accelerator and its sequencer
//! - [`ConfigError`]: a layer or memory map that must be rejected before any compute step.
//! - [`ProtocolError`]: the sequencer state machine was driven out of order.
//! - [`AccelError`]: everything a layer run can fail with.
//!
//! numeric saturation is not an error, it is handled by clamping in [`crate::accelerator::fixed_point`].
use thiserror::Error;

use crate::sequencer::SequencerState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown layer kind code {0}")]
    UnknownLayerKind(u32),
    #[error("unsupported kernel size {0}, expected 1 or 3")]
    UnsupportedKernel(usize),
    #[error("unsupported stride {0}, expected 1 or 2")]
    UnsupportedStride(usize),
    #[error("unsupported padding {0}, expected 0 or 1")]
    UnsupportedPadding(usize),
    #[error("{name} must be greater than 0")]
    ZeroDimension { name: &'static str },
    #[error("{name} is {value}, the maximum supported is {max}")]
    DimensionTooLarge {
        name: &'static str,
        value: usize,
        max: usize,
    },
    #[error("kernel {kernel} does not fit into the padded input {height}x{width}")]
    EmptyOutput {
        kernel: usize,
        height: usize,
        width: usize,
    },
    #[error("max pooling needs even dimensions, the convolution output is {height}x{width}")]
    OddPoolDimensions { height: usize, width: usize },
    #[error("max pooling and global average pooling cannot be requested on the same layer")]
    ConflictingPoolModes,
    #[error("a minimal tile needs {required} elements but the tile capacity is {capacity}")]
    TileDoesNotFit { required: usize, capacity: usize },
    #[error("region [{a_start:#x}, {a_end:#x}) overlaps region [{b_start:#x}, {b_end:#x})")]
    RegionOverlap {
        a_start: u64,
        a_end: u64,
        b_start: u64,
        b_end: u64,
    },
    #[error("a region needs {required} bytes but only {available} bytes are available")]
    RegionTooSmall { required: u64, available: u64 },
    #[error("address {0:#x} is not aligned to the element size")]
    Misaligned(u64),
    #[error("a range starting at {0:#x} runs past the end of the address space")]
    AddressOverflow(u64),
    #[error("layer {layer} expects input {expected:?} but the previous layer produces {actual:?}")]
    LayerChain {
        layer: usize,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("the network table has no layers")]
    EmptyNetwork,
    #[error("{what} has {actual} elements, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("configure() needs the sequencer to be idle, it is {0:?}")]
    ConfigureWhileBusy(SequencerState),
    #[error("start() needs a configured layer, the sequencer is {0:?}")]
    StartWithoutConfigure(SequencerState),
    #[error("poll_done() needs a running layer, the sequencer is {0:?}")]
    PollWhileNotRunning(SequencerState),
    #[error("the device is not idle (control register {0:#x})")]
    DeviceBusy(u32),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccelError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("protocol misuse: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("memory fault: {len} bytes at {addr:#x} are not mapped")]
    MemoryFault { addr: u64, len: u64 },
    #[error("device finished with status {0:#x}")]
    Device(u32),
    #[error("layer did not report done within {0} polls")]
    PollLimit(u64),
}
