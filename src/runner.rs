//! # the network runner
//! - builds the device memory map for a network table, loads a workload and runs every layer
//!   through the [`LayerSequencer`].
//! - the two feature map regions swap roles after every layer: the output of layer `n` is the input
//!   of layer `n + 1`, and no layer reads and writes the same region.
use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{error::Error, mem::swap, time::Instant};

use crate::{
    accelerator::{fixed_point::Data, memory::DeviceMemory, CnnAccelerator, RegisterInterface},
    error::{AccelError, ConfigError},
    layer::{LayerAddresses, LayerDescriptor},
    network::NetworkTable,
    reference,
    sequencer::LayerSequencer,
    settings::{AcceleratorSettings, MemorySettings, Settings},
    sim_result::{CnnStatistics, LayerStatistics},
    tensor::{NormParams, Tensor, WeightTensor},
};

/// the regions one network needs, sized from its table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPlan {
    pub ping: u64,
    pub pong: u64,
    pub region_bytes: u64,
    pub weights: u64,
    pub weight_bytes: u64,
    pub norm_scale: u64,
    pub norm_shift: u64,
    pub norm_bytes: u64,
}

impl MemoryPlan {
    pub fn new(table: &NetworkTable, settings: &MemorySettings) -> Result<Self, ConfigError> {
        let region_bytes = table.feature_map_bytes();
        if region_bytes > settings.region_bytes {
            return Err(ConfigError::RegionTooSmall {
                required: region_bytes,
                available: settings.region_bytes,
            });
        }
        Ok(MemoryPlan {
            ping: settings.ping_addr,
            pong: settings.pong_addr,
            region_bytes,
            weights: settings.weights_addr,
            weight_bytes: table.weight_bytes(),
            norm_scale: settings.norm_scale_addr,
            norm_shift: settings.norm_shift_addr,
            norm_bytes: table.norm_bytes(),
        })
    }

    /// map every region, overlapping regions are rejected
    pub fn build_memory(&self) -> Result<DeviceMemory, ConfigError> {
        let mut memory = DeviceMemory::new();
        memory.map_region(self.ping, self.region_bytes)?;
        memory.map_region(self.pong, self.region_bytes)?;
        memory.map_region(self.weights, self.weight_bytes)?;
        memory.map_region(self.norm_scale, self.norm_bytes)?;
        memory.map_region(self.norm_shift, self.norm_bytes)?;
        Ok(memory)
    }
}

/// the input image and all parameters of a network
#[derive(Debug, Clone)]
pub struct Workload {
    pub input: Tensor<Data>,
    pub weights: Vec<WeightTensor>,
    pub norms: Vec<NormParams>,
}

impl Workload {
    /// # Description
    /// - a deterministic random workload for `table`
    /// - weights are scaled by the fan in so activations stay in range across layers
    pub fn synthetic(table: &NetworkTable, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let input = Tensor::from_fn(table.input_shape(), |_, _, _| {
            Data::from_f32(rng.gen_range(0.0..1.0))
        });
        let mut weights = Vec::with_capacity(table.layers.len());
        let mut norms = Vec::with_capacity(table.layers.len());
        for entry in &table.layers {
            let d = entry.descriptor;
            let bound = 1.0 / ((d.in_channels * d.kernel_size * d.kernel_size) as f32).sqrt();
            weights.push(WeightTensor::from_fn(
                d.out_channels,
                d.in_channels,
                d.kernel_size,
                |_, _, _, _| Data::from_f32(rng.gen_range(-bound..bound)),
            ));
            let channels = d.out_channels;
            let mut draw = |lo: f32, hi: f32| -> Vec<f32> {
                (0..channels).map(|_| rng.gen_range(lo..hi)).collect()
            };
            let (gamma, beta, mean, var) = (
                draw(0.5, 1.5),
                draw(-0.1, 0.1),
                draw(-0.1, 0.1),
                draw(0.5, 1.5),
            );
            norms.push(
                NormParams::fold(&gamma, &beta, &mean, &var, 1e-5)
                    .unwrap_or_else(|_| NormParams::identity(channels)),
            );
        }
        Workload {
            input,
            weights,
            norms,
        }
    }

    /// every tensor must match the layer that consumes it
    pub fn check(&self, table: &NetworkTable) -> Result<(), ConfigError> {
        let expected = table.input_shape().len();
        if self.input.shape() != table.input_shape() {
            return Err(ConfigError::ShapeMismatch {
                what: "input image",
                expected,
                actual: self.input.shape().len(),
            });
        }
        for (what, actual) in [("weight tensors", self.weights.len()), ("norm parameters", self.norms.len())] {
            if actual != table.layers.len() {
                return Err(ConfigError::ShapeMismatch {
                    what,
                    expected: table.layers.len(),
                    actual,
                });
            }
        }
        for ((entry, weights), norm) in table.layers.iter().zip(&self.weights).zip(&self.norms) {
            if weights.len() != entry.descriptor.weight_len() {
                return Err(ConfigError::ShapeMismatch {
                    what: "weight tensor",
                    expected: entry.descriptor.weight_len(),
                    actual: weights.len(),
                });
            }
            if norm.len() != entry.descriptor.out_channels {
                return Err(ConfigError::ShapeMismatch {
                    what: "norm parameters",
                    expected: entry.descriptor.out_channels,
                    actual: norm.len(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NetworkRun {
    pub output: Tensor<Data>,
    pub output_addr: u64,
    pub layers: Vec<LayerStatistics>,
}

impl NetworkRun {
    pub fn cycles(&self) -> u64 {
        self.layers.iter().map(|l| l.counters.cycles).sum()
    }
}

pub struct NetworkRunner {
    sequencer: LayerSequencer<CnnAccelerator>,
    table: NetworkTable,
    plan: MemoryPlan,
}

impl NetworkRunner {
    /// check the table, size and map the memory, and build the device
    pub fn new(
        table: NetworkTable,
        accelerator: &AcceleratorSettings,
        memory: &MemorySettings,
    ) -> Result<Self, AccelError> {
        table.validate(accelerator)?;
        let plan = MemoryPlan::new(&table, memory)?;
        let device = CnnAccelerator::new(accelerator, plan.build_memory()?);
        Ok(NetworkRunner {
            sequencer: LayerSequencer::new(device, accelerator),
            table,
            plan,
        })
    }

    pub fn plan(&self) -> &MemoryPlan {
        &self.plan
    }

    pub fn table(&self) -> &NetworkTable {
        &self.table
    }

    pub fn sequencer(&self) -> &LayerSequencer<CnnAccelerator> {
        &self.sequencer
    }

    /// the addresses layer `index` runs with
    pub fn layer_addresses(&self, index: usize) -> LayerAddresses {
        let (input, output) = if index % 2 == 0 {
            (self.plan.ping, self.plan.pong)
        } else {
            (self.plan.pong, self.plan.ping)
        };
        let entry = &self.table.layers[index];
        LayerAddresses {
            input,
            output,
            weights: self.plan.weights + entry.weight_offset,
            norm_scale: self.plan.norm_scale + entry.norm_offset,
            norm_shift: self.plan.norm_shift + entry.norm_offset,
        }
    }

    /// upload the input image into the ping region and every parameter into its store
    pub fn load(&mut self, workload: &Workload) -> Result<(), AccelError> {
        workload.check(&self.table)?;
        let plan = self.plan;
        let memory = self.sequencer.device_mut().memory_mut();
        memory.upload(plan.ping, workload.input.as_slice())?;
        for ((entry, weights), norm) in self
            .table
            .layers
            .iter()
            .zip(&workload.weights)
            .zip(&workload.norms)
        {
            memory.upload(plan.weights + entry.weight_offset, weights.as_slice())?;
            memory.upload(plan.norm_scale + entry.norm_offset, &norm.scale)?;
            memory.upload(plan.norm_shift + entry.norm_offset, &norm.shift)?;
        }
        Ok(())
    }

    /// run every layer in order and read back the final tensor
    pub fn run(&mut self) -> Result<NetworkRun, AccelError> {
        let mut input_addr = self.plan.ping;
        let mut output_addr = self.plan.pong;
        let mut layers = Vec::with_capacity(self.table.layers.len());
        for (index, entry) in self.table.layers.iter().enumerate() {
            let desc = entry.descriptor;
            let addrs = LayerAddresses {
                input: input_addr,
                output: output_addr,
                weights: self.plan.weights + entry.weight_offset,
                norm_scale: self.plan.norm_scale + entry.norm_offset,
                norm_shift: self.plan.norm_shift + entry.norm_offset,
            };
            let polls = self.sequencer.run_layer(&desc, &addrs)?;
            let device = self.sequencer.device();
            let stats = LayerStatistics {
                layer: index,
                kind: desc.kind,
                input_addr,
                output_addr,
                output_shape: desc.output_shape(),
                polls,
                counters: device.counters(),
                memory: device.memory_stats(),
            };
            info!(
                "layer {} ({:?}) {:?} -> {:?}: {} cycles",
                index,
                desc.kind,
                desc.input_shape(),
                desc.output_shape(),
                stats.counters.cycles
            );
            layers.push(stats);
            swap(&mut input_addr, &mut output_addr);
        }
        let shape = self.table.output_shape();
        let data = self
            .sequencer
            .device()
            .memory()
            .download(input_addr, shape.len())?;
        Ok(NetworkRun {
            output: Tensor::from_vec(shape, data)?,
            output_addr: input_addr,
            layers,
        })
    }
}

/// run one layer alone and return its largest deviation from the floating point reference
pub fn check_layer(
    desc: &LayerDescriptor,
    input: &Tensor<Data>,
    weights: &WeightTensor,
    norm: &NormParams,
    accelerator: &AcceleratorSettings,
    memory: &MemorySettings,
) -> Result<f32, AccelError> {
    let table = NetworkTable::from_descriptors("check", &[*desc])?;
    let workload = Workload {
        input: input.clone(),
        weights: vec![weights.clone()],
        norms: vec![norm.clone()],
    };
    let mut runner = NetworkRunner::new(table, accelerator, memory)?;
    runner.load(&workload)?;
    let run = runner.run()?;
    let expected = reference::layer(&input.to_f32(), weights, norm, desc);
    Ok(reference::max_abs_diff(&run.output.to_f32(), &expected))
}

/// # Description
/// - load the configured network, synthesize its workload and run it
/// - with `verify` set the first layer is also run alone and compared with the floating point reference
pub fn simulate(settings: &Settings) -> Result<CnnStatistics, Box<dyn Error>> {
    let start_time = Instant::now();
    let table = if settings.network_path.is_empty() {
        NetworkTable::yolo_lite()
    } else {
        NetworkTable::new(&settings.network_path)?
    };
    info!("network {}: {} layers", table.name, table.layers.len());
    let workload = Workload::synthetic(&table, settings.seed);
    let mut stat = CnnStatistics::new();
    stat.network = table.name.clone();

    if settings.verify {
        if let (Some(entry), Some(weights), Some(norm)) = (
            table.layers.first(),
            workload.weights.first(),
            workload.norms.first(),
        ) {
            let error = check_layer(
                &entry.descriptor,
                &workload.input,
                weights,
                norm,
                &settings.accelerator_settings,
                &settings.memory_settings,
            )?;
            if error > 0.5 {
                warn!("layer 0 deviates from the reference by {}", error);
            } else {
                info!("layer 0 deviates from the reference by {}", error);
            }
            stat.max_reference_error = Some(error);
        }
    }

    let mut runner = NetworkRunner::new(
        table,
        &settings.accelerator_settings,
        &settings.memory_settings,
    )?;
    runner.load(&workload)?;
    let run = runner.run()?;
    stat.cycle = run.cycles();
    stat.macs = run.layers.iter().map(|l| l.counters.macs).sum();
    stat.saturations = run.layers.iter().map(|l| l.counters.saturations).sum();
    stat.layers = run.layers;

    // record the simulation time
    let simulation_time = start_time.elapsed().as_secs();
    let seconds = simulation_time % 60;
    let minutes = (simulation_time / 60) % 60;
    let hours = (simulation_time / 60) / 60;
    stat.simulation_time = format!("{}:{}:{}", hours, minutes, seconds);
    Ok(stat)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layer::LayerKind;

    fn tiny() -> Result<NetworkTable, ConfigError> {
        NetworkTable::from_descriptors(
            "tiny",
            &[
                LayerDescriptor::new(LayerKind::ConvBnActPool, 3, 8, 8, 8, 3, 1, 1),
                LayerDescriptor::new(LayerKind::ConvOnly, 8, 4, 4, 4, 1, 1, 0),
            ],
        )
    }

    #[test]
    fn test_plan_sizes() -> Result<(), ConfigError> {
        let table = tiny()?;
        let plan = MemoryPlan::new(&table, &MemorySettings::default())?;
        assert_eq!(plan.region_bytes, 8 * 8 * 8 * 2);
        assert_eq!(plan.weight_bytes, (8 * 3 * 9 + 4 * 8) * 2);
        assert_eq!(plan.norm_bytes, (8 + 4) * 2);
        let memory = plan.build_memory()?;
        assert_eq!(memory.regions().count(), 5);

        let small = MemorySettings {
            region_bytes: 64,
            ..Default::default()
        };
        assert_eq!(
            MemoryPlan::new(&table, &small),
            Err(ConfigError::RegionTooSmall {
                required: 1024,
                available: 64
            })
        );
        Ok(())
    }

    #[test]
    fn test_synthetic_workload_is_deterministic() -> Result<(), ConfigError> {
        let table = tiny()?;
        let a = Workload::synthetic(&table, 7);
        let b = Workload::synthetic(&table, 7);
        let c = Workload::synthetic(&table, 8);
        assert_eq!(a.input, b.input);
        assert_eq!(a.weights, b.weights);
        assert_ne!(a.input, c.input);
        a.check(&table)?;
        let mut broken = a.clone();
        broken.norms.pop();
        assert!(broken.check(&table).is_err());
        Ok(())
    }

    #[test]
    fn test_run_records_ping_pong() -> Result<(), AccelError> {
        let table = tiny()?;
        let workload = Workload::synthetic(&table, 1);
        let mut runner =
            NetworkRunner::new(table, &AcceleratorSettings::default(), &MemorySettings::default())?;
        runner.load(&workload)?;
        let run = runner.run()?;
        let plan = *runner.plan();
        assert_eq!(run.layers[0].input_addr, plan.ping);
        assert_eq!(run.layers[0].output_addr, plan.pong);
        assert_eq!(run.layers[1].input_addr, plan.pong);
        assert_eq!(run.layers[1].output_addr, plan.ping);
        assert_eq!(run.output_addr, plan.ping);
        assert_eq!(runner.layer_addresses(1).input, plan.pong);
        assert_eq!(run.output.shape().as_tuple(), (4, 4, 4));
        assert!(run.cycles() > 0);
        Ok(())
    }
}
