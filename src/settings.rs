//! # the settings of the cnn accelerator
//! - this mod contains the settings of the accelerator and of its memory map.
//!
use config::{Config, File};
use glob::glob;
use itertools::Itertools;

use serde::{Deserialize, Serialize};
use std::{error::Error, string::String};

/// # Description
/// - struct for recording the settings of one simulation run.
/// # Fields
/// - `network_path`: a network table in toml, empty selects the built in yolo-lite table
/// - `seed`: the seed of the synthetic workload
/// - `verify`: compare the first layer with the floating point reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub description: String,
    pub network_path: String,
    pub seed: u64,
    pub verify: bool,
    pub accelerator_settings: AcceleratorSettings,
    pub memory_settings: MemorySettings,
}

/// # Description
/// - struct for recording the settings of the accelerator.
/// # Fields
/// - `tile_capacity`: elements held by each on-chip tile buffer
/// - `tile_channels`, `tile_height`, `tile_width`: the nominal tile, shrunk per layer until it fits
/// - `parallel_out_channels`: output channels computed side by side
/// - `max_poll_cycles`: give up waiting for a layer after this many polls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorSettings {
    pub tile_capacity: usize,
    pub tile_channels: usize,
    pub tile_height: usize,
    pub tile_width: usize,
    pub parallel_out_channels: usize,
    pub max_poll_cycles: u64,
}

impl Default for AcceleratorSettings {
    fn default() -> Self {
        AcceleratorSettings {
            tile_capacity: 9216,
            tile_channels: 32,
            tile_height: 14,
            tile_width: 14,
            parallel_out_channels: 8,
            max_poll_cycles: 1 << 32,
        }
    }
}

/// # Description
/// - struct for recording the external memory map, all values are byte addresses.
/// - the two feature map regions are `region_bytes` long each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub ping_addr: u64,
    pub pong_addr: u64,
    pub region_bytes: u64,
    pub weights_addr: u64,
    pub norm_scale_addr: u64,
    pub norm_shift_addr: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        MemorySettings {
            ping_addr: 0x1000_0000,
            pong_addr: 0x1400_0000,
            region_bytes: 0x0400_0000,
            weights_addr: 0x1800_0000,
            norm_scale_addr: 0x1C00_0000,
            norm_shift_addr: 0x1C01_0000,
        }
    }
}

impl Settings {
    /// # Description
    /// - create the settings of the accelerator.
    /// - will read all configs provided in the config_path.
    /// - the configs/user_configs/*.toml will also be read.
    /// # Arguments
    /// - `config_path`: the vec of paths of the config file with surfix `.toml`.
    /// # Return
    /// - `Result<Settings, Box<dyn Error>>`: the checked settings.
    pub fn new(config_path: Vec<String>) -> Result<Self, Box<dyn Error>> {
        let input_files = config_path.iter().map(|x| File::with_name(x)).collect_vec();
        let default_files: Vec<_> = glob("configs/user_configs/*.toml")?
            .map_ok(File::from)
            .try_collect()?;

        let result: Settings = Config::builder()
            .add_source(input_files)
            .add_source(default_files)
            .build()?
            .try_deserialize()?;
        result.validate()?;
        Ok(result)
    }

    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        let acc = &self.accelerator_settings;
        if acc.tile_capacity == 0 {
            return Err("tile_capacity must be greater than 0".into());
        }
        if acc.tile_channels == 0 || acc.tile_height == 0 || acc.tile_width == 0 {
            return Err("the nominal tile sizes must be greater than 0".into());
        }
        if acc.parallel_out_channels == 0 {
            return Err("parallel_out_channels must be greater than 0".into());
        }
        if acc.max_poll_cycles == 0 {
            return Err("max_poll_cycles must be greater than 0".into());
        }
        let mem = &self.memory_settings;
        if mem.region_bytes == 0 {
            return Err("region_bytes must be greater than 0".into());
        }
        if mem.ping_addr < mem.pong_addr + mem.region_bytes
            && mem.pong_addr < mem.ping_addr + mem.region_bytes
        {
            return Err(format!(
                "ping region {:#x} and pong region {:#x} overlap",
                mem.ping_addr, mem.pong_addr
            )
            .into());
        }
        Ok(())
    }
}
