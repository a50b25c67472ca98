//! # Description
//! - [`CnnAccelerator`] is the device: a latched register file in front of a cycle-stepped pipeline.
//! - writing `AP_START` while idle captures the latched layer, validates it and starts the traversal.
//! - every [`RegisterInterface::cycle`] performs one unit of work: one input channel group of one
//!   output tile (the fused commit happens together with the last group), or one pooled channel.
//! - `AP_DONE` is raised only after the last unit, the first read of the control register clears it.
//!
//! # Status
//! - a job the device cannot run finishes at once with [`STATUS_CONFIG_REJECTED`] and writes nothing.
//! - an access outside the mapped memory aborts the layer with [`STATUS_MEMORY_FAULT`].
use enum_as_inner::EnumAsInner;
use log::{debug, error, info, warn};

use super::{
    arena::TileArena,
    conv::ConvAccumulator,
    fusion::FusionStage,
    memory::{DeviceMemory, MemoryStats},
    pooling::PoolingStage,
    registers::*,
    tile_scheduler::{InputGroupIterator, OutputTileIterator, TileScheduler},
};
use crate::{
    error::{AccelError, ConfigError},
    layer::{LayerAddresses, LayerDescriptor, PoolMode},
    settings::AcceleratorSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Convolve,
    /// the next output channel to pool
    Pool(usize),
}

#[derive(Debug)]
struct RunState {
    desc: LayerDescriptor,
    addrs: LayerAddresses,
    tiles: OutputTileIterator,
    groups: Option<InputGroupIterator>,
    stage: Stage,
}

#[derive(Debug, EnumAsInner)]
enum Phase {
    Idle,
    Running(Box<RunState>),
    /// finished, `AP_DONE` not yet observed
    Done,
}

pub struct CnnAccelerator {
    settings: AcceleratorSettings,
    regs: RegisterFile,
    ctrl: u32,
    status: u32,
    phase: Phase,
    memory: DeviceMemory,
    arena: TileArena,
    conv: ConvAccumulator,
    fusion: FusionStage,
    pooling: PoolingStage,
    counters: LayerCounters,
    layers_started: usize,
}

impl CnnAccelerator {
    pub fn new(settings: &AcceleratorSettings, memory: DeviceMemory) -> Self {
        CnnAccelerator {
            settings: settings.clone(),
            regs: RegisterFile::default(),
            ctrl: AP_IDLE | AP_READY,
            status: STATUS_OK,
            phase: Phase::Idle,
            memory,
            arena: TileArena::new(settings.tile_capacity),
            conv: ConvAccumulator::new(settings.parallel_out_channels),
            fusion: FusionStage,
            pooling: PoolingStage,
            counters: LayerCounters::default(),
            layers_started: 0,
        }
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut DeviceMemory {
        &mut self.memory
    }

    pub fn into_memory(self) -> DeviceMemory {
        self.memory
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    fn check_job(&self, layer_id: usize) -> Result<RunState, ConfigError> {
        let (desc, addrs) = self.regs.decode()?;
        addrs.check_disjoint(&desc)?;
        let scheduler = TileScheduler::new(&desc, &self.settings, layer_id)?;
        debug!(
            "layer {}: tile shape {:?}, {} steps",
            layer_id,
            scheduler.tile_shape(),
            scheduler.num_steps()
        );
        Ok(RunState {
            desc,
            addrs,
            tiles: scheduler.tiles(),
            groups: None,
            stage: Stage::Convolve,
        })
    }

    fn launch(&mut self) {
        let layer_id = self.layers_started;
        self.layers_started += 1;
        self.counters = LayerCounters::default();
        self.memory.reset_stats();
        match self.check_job(layer_id) {
            Ok(run) => {
                info!("layer {} started: {:?}", layer_id, run.desc);
                self.ctrl = AP_START;
                self.status = STATUS_RUNNING;
                self.phase = Phase::Running(Box::new(run));
            }
            Err(e) => {
                error!("layer {} rejected: {}", layer_id, e);
                self.finish(STATUS_CONFIG_REJECTED);
            }
        }
    }

    fn finish(&mut self, status: u32) {
        self.status = status;
        self.ctrl = AP_DONE | AP_IDLE | AP_READY;
        self.phase = Phase::Done;
    }

    /// one unit of work, returns true once the layer is complete
    fn step(&mut self) -> Result<bool, AccelError> {
        let CnnAccelerator {
            phase,
            memory,
            arena,
            conv,
            fusion,
            pooling,
            counters,
            ..
        } = self;
        let run = match phase.as_running_mut() {
            Some(run) => run,
            None => return Ok(true),
        };
        loop {
            match run.stage {
                Stage::Convolve => {
                    let mut groups = match run.groups.take().or_else(|| run.tiles.next()) {
                        Some(groups) => groups,
                        None if run.desc.pool_mode() == PoolMode::None => return Ok(true),
                        None => {
                            run.stage = Stage::Pool(0);
                            continue;
                        }
                    };
                    let tile = *groups.tile();
                    let group = match groups.next() {
                        Some(group) => group,
                        None => continue,
                    };
                    let k = run.desc.kernel_size;
                    let views = arena.accumulate_views(
                        group.len(),
                        tile.channels() * group.channels() * k * k,
                        tile.len(),
                    );
                    conv.load_input(memory, run.addrs.input, &run.desc, &group, views.input)?;
                    conv.load_weights(
                        memory,
                        run.addrs.weights,
                        &run.desc,
                        &tile,
                        &group,
                        views.weights,
                    )?;
                    counters.macs += conv.accumulate(
                        &run.desc,
                        &tile,
                        &group,
                        views.input,
                        views.weights,
                        views.acc,
                    );
                    counters.groups += 1;
                    if !group.is_last {
                        run.groups = Some(groups);
                        return Ok(false);
                    }
                    let views = arena.commit_views(tile.len(), tile.channels(), tile.width());
                    counters.saturations +=
                        fusion.commit_tile(memory, &run.addrs, &run.desc, &tile, views)?;
                    counters.tiles += 1;
                    if !tile.is_final_tile {
                        return Ok(false);
                    }
                    if run.desc.pool_mode() == PoolMode::None {
                        return Ok(true);
                    }
                    run.stage = Stage::Pool(0);
                    return Ok(false);
                }
                Stage::Pool(c) => {
                    pooling.pool_channel(memory, run.addrs.output, &run.desc, c)?;
                    counters.pool_steps += 1;
                    if c + 1 >= run.desc.out_channels {
                        return Ok(true);
                    }
                    run.stage = Stage::Pool(c + 1);
                    return Ok(false);
                }
            }
        }
    }
}

impl RegisterInterface for CnnAccelerator {
    fn read_reg(&mut self, offset: u32) -> u32 {
        match offset {
            REG_AP_CTRL => {
                let value = self.ctrl;
                if value & AP_DONE != 0 {
                    self.ctrl &= !AP_DONE;
                    self.phase = Phase::Idle;
                }
                value
            }
            REG_STATUS => self.status,
            _ => self.regs.read(offset).unwrap_or_else(|| {
                warn!("read of unknown register {:#x}", offset);
                0
            }),
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            REG_AP_CTRL if value & AP_START != 0 => {
                if self.ctrl & AP_IDLE != 0 {
                    self.launch();
                } else {
                    warn!("start ignored, the device is busy (ctrl {:#x})", self.ctrl);
                }
            }
            REG_AP_CTRL => {}
            REG_STATUS => warn!("the status register is read only"),
            _ => {
                if !self.regs.write(offset, value) {
                    warn!("write of {:#x} to unknown register {:#x}", value, offset);
                }
            }
        }
    }

    fn cycle(&mut self) {
        if !self.phase.is_running() {
            return;
        }
        self.counters.cycles += 1;
        match self.step() {
            Ok(true) => {
                info!("layer finished: {:?}", self.counters);
                self.finish(STATUS_OK);
            }
            Ok(false) => {}
            Err(e) => {
                error!("layer aborted: {}", e);
                self.finish(STATUS_MEMORY_FAULT);
            }
        }
    }

    fn counters(&self) -> LayerCounters {
        self.counters
    }

    fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }
}
