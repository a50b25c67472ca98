//! # mod sim result
//! - this mod contains structs for recording the result of a network simulation.
use crate::{
    accelerator::{memory::MemoryStats, registers::LayerCounters},
    layer::LayerKind,
    settings::Settings,
    tensor::Shape,
};
use serde::Serialize;
///
/// # Description
/// - struct for recording the result of a network simulation.
/// # Fields
/// - settings: the settings of the simulation.`cnn_accel::settings::Settings`
/// - stats: the statistics
#[derive(Debug, Serialize, Default)]
pub struct CnnAccelResult {
    pub settings: Option<Settings>,
    pub stats: Option<CnnStatistics>,
}

impl CnnAccelResult {
    pub fn new() -> Self {
        Self::default()
    }
}

/// # Description
/// - struct for recording the statistics of a network simulation.
/// # Fields
/// - cycle: device cycles over all layers
/// - max_reference_error: largest deviation of the checked layer from the floating point reference
/// - simulation_time: the wall clock time of the simulation
#[derive(Debug, Serialize, Default)]
pub struct CnnStatistics {
    pub network: String,
    pub cycle: u64,
    pub macs: u64,
    pub saturations: u64,
    pub max_reference_error: Option<f32>,
    pub layers: Vec<LayerStatistics>,
    pub simulation_time: String,
}

impl CnnStatistics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// # Description
/// - what one layer did and where its tensors lived
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatistics {
    pub layer: usize,
    pub kind: LayerKind,
    pub input_addr: u64,
    pub output_addr: u64,
    pub output_shape: Shape,
    pub polls: u64,
    #[serde(flatten)]
    pub counters: LayerCounters,
    #[serde(flatten)]
    pub memory: MemoryStats,
}
