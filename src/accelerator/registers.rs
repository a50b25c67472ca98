//! # Description
//! - the register map of the accelerator and the [`RegisterInterface`] the sequencer drives.
//! - the control bank holds the handshake bits and the layer geometry,
//!   the address bank at [`ADDR_BANK_BASE`] holds 64 bit addresses split into low/high words.
//! - [`RegisterFile`] is the latched copy of all configuration registers.
use serde::Serialize;

use super::memory::MemoryStats;
use crate::{
    error::ConfigError,
    layer::{LayerAddresses, LayerDescriptor, LayerKind},
};

pub const REG_AP_CTRL: u32 = 0x00;
pub const REG_STATUS: u32 = 0x18;
pub const REG_LAYER_TYPE: u32 = 0x28;
pub const REG_IN_CHANNELS: u32 = 0x30;
pub const REG_OUT_CHANNELS: u32 = 0x38;
pub const REG_IN_HEIGHT: u32 = 0x40;
pub const REG_IN_WIDTH: u32 = 0x48;
pub const REG_KERNEL_SIZE: u32 = 0x50;
pub const REG_STRIDE: u32 = 0x58;
pub const REG_PADDING: u32 = 0x60;
pub const REG_GLOBAL_POOL: u32 = 0x68;

pub const ADDR_BANK_BASE: u32 = 0x1_0000;
pub const REG_INPUT_FM_LO: u32 = ADDR_BANK_BASE + 0x10;
pub const REG_INPUT_FM_HI: u32 = ADDR_BANK_BASE + 0x14;
pub const REG_OUTPUT_FM_LO: u32 = ADDR_BANK_BASE + 0x1C;
pub const REG_OUTPUT_FM_HI: u32 = ADDR_BANK_BASE + 0x20;
pub const REG_WEIGHTS_LO: u32 = ADDR_BANK_BASE + 0x28;
pub const REG_WEIGHTS_HI: u32 = ADDR_BANK_BASE + 0x2C;
pub const REG_NORM_SCALE_LO: u32 = ADDR_BANK_BASE + 0x34;
pub const REG_NORM_SCALE_HI: u32 = ADDR_BANK_BASE + 0x38;
pub const REG_NORM_SHIFT_LO: u32 = ADDR_BANK_BASE + 0x40;
pub const REG_NORM_SHIFT_HI: u32 = ADDR_BANK_BASE + 0x44;

pub const AP_START: u32 = 1 << 0;
pub const AP_DONE: u32 = 1 << 1;
pub const AP_IDLE: u32 = 1 << 2;
pub const AP_READY: u32 = 1 << 3;

pub const STATUS_OK: u32 = 0;
pub const STATUS_RUNNING: u32 = 1;
pub const STATUS_CONFIG_REJECTED: u32 = 2;
pub const STATUS_MEMORY_FAULT: u32 = 3;

pub fn split_addr(addr: u64) -> (u32, u32) {
    (addr as u32, (addr >> 32) as u32)
}

pub fn join_addr(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

fn set_lo(addr: &mut u64, lo: u32) {
    *addr = join_addr(lo, (*addr >> 32) as u32);
}

fn set_hi(addr: &mut u64, hi: u32) {
    *addr = join_addr(*addr as u32, hi);
}

/// per-layer activity of the device, reset when a layer starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerCounters {
    pub cycles: u64,
    pub tiles: u64,
    pub groups: u64,
    pub pool_steps: u64,
    pub macs: u64,
    pub saturations: u64,
}

/// # Description
/// - what a sequencer needs from a device: register access and a clock
pub trait RegisterInterface {
    fn read_reg(&mut self, offset: u32) -> u32;
    fn write_reg(&mut self, offset: u32, value: u32);
    /// advance the device by one step
    fn cycle(&mut self);
    fn counters(&self) -> LayerCounters;
    fn memory_stats(&self) -> MemoryStats;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    pub layer_type: u32,
    pub in_channels: u32,
    pub out_channels: u32,
    pub in_height: u32,
    pub in_width: u32,
    pub kernel_size: u32,
    pub stride: u32,
    pub padding: u32,
    pub global_pool: u32,
    pub input_fm: u64,
    pub output_fm: u64,
    pub weights: u64,
    pub norm_scale: u64,
    pub norm_shift: u64,
}

impl RegisterFile {
    /// latch a configuration register, returns false for an unknown offset
    pub fn write(&mut self, offset: u32, value: u32) -> bool {
        match offset {
            REG_LAYER_TYPE => self.layer_type = value,
            REG_IN_CHANNELS => self.in_channels = value,
            REG_OUT_CHANNELS => self.out_channels = value,
            REG_IN_HEIGHT => self.in_height = value,
            REG_IN_WIDTH => self.in_width = value,
            REG_KERNEL_SIZE => self.kernel_size = value,
            REG_STRIDE => self.stride = value,
            REG_PADDING => self.padding = value,
            REG_GLOBAL_POOL => self.global_pool = value,
            REG_INPUT_FM_LO => set_lo(&mut self.input_fm, value),
            REG_INPUT_FM_HI => set_hi(&mut self.input_fm, value),
            REG_OUTPUT_FM_LO => set_lo(&mut self.output_fm, value),
            REG_OUTPUT_FM_HI => set_hi(&mut self.output_fm, value),
            REG_WEIGHTS_LO => set_lo(&mut self.weights, value),
            REG_WEIGHTS_HI => set_hi(&mut self.weights, value),
            REG_NORM_SCALE_LO => set_lo(&mut self.norm_scale, value),
            REG_NORM_SCALE_HI => set_hi(&mut self.norm_scale, value),
            REG_NORM_SHIFT_LO => set_lo(&mut self.norm_shift, value),
            REG_NORM_SHIFT_HI => set_hi(&mut self.norm_shift, value),
            _ => return false,
        }
        true
    }

    pub fn read(&self, offset: u32) -> Option<u32> {
        let value = match offset {
            REG_LAYER_TYPE => self.layer_type,
            REG_IN_CHANNELS => self.in_channels,
            REG_OUT_CHANNELS => self.out_channels,
            REG_IN_HEIGHT => self.in_height,
            REG_IN_WIDTH => self.in_width,
            REG_KERNEL_SIZE => self.kernel_size,
            REG_STRIDE => self.stride,
            REG_PADDING => self.padding,
            REG_GLOBAL_POOL => self.global_pool,
            REG_INPUT_FM_LO => split_addr(self.input_fm).0,
            REG_INPUT_FM_HI => split_addr(self.input_fm).1,
            REG_OUTPUT_FM_LO => split_addr(self.output_fm).0,
            REG_OUTPUT_FM_HI => split_addr(self.output_fm).1,
            REG_WEIGHTS_LO => split_addr(self.weights).0,
            REG_WEIGHTS_HI => split_addr(self.weights).1,
            REG_NORM_SCALE_LO => split_addr(self.norm_scale).0,
            REG_NORM_SCALE_HI => split_addr(self.norm_scale).1,
            REG_NORM_SHIFT_LO => split_addr(self.norm_shift).0,
            REG_NORM_SHIFT_HI => split_addr(self.norm_shift).1,
            _ => return None,
        };
        Some(value)
    }

    /// the register writes that describe one layer, in the order the driver issues them
    pub fn encode(desc: &LayerDescriptor, addrs: &LayerAddresses) -> Vec<(u32, u32)> {
        let mut writes = vec![
            (REG_LAYER_TYPE, desc.kind.code()),
            (REG_IN_CHANNELS, desc.in_channels as u32),
            (REG_OUT_CHANNELS, desc.out_channels as u32),
            (REG_IN_HEIGHT, desc.in_height as u32),
            (REG_IN_WIDTH, desc.in_width as u32),
            (REG_KERNEL_SIZE, desc.kernel_size as u32),
            (REG_STRIDE, desc.stride as u32),
            (REG_PADDING, desc.padding as u32),
            (REG_GLOBAL_POOL, desc.global_pool as u32),
        ];
        for (lo_reg, hi_reg, addr) in [
            (REG_INPUT_FM_LO, REG_INPUT_FM_HI, addrs.input),
            (REG_OUTPUT_FM_LO, REG_OUTPUT_FM_HI, addrs.output),
            (REG_WEIGHTS_LO, REG_WEIGHTS_HI, addrs.weights),
            (REG_NORM_SCALE_LO, REG_NORM_SCALE_HI, addrs.norm_scale),
            (REG_NORM_SHIFT_LO, REG_NORM_SHIFT_HI, addrs.norm_shift),
        ] {
            let (lo, hi) = split_addr(addr);
            writes.push((lo_reg, lo));
            writes.push((hi_reg, hi));
        }
        writes
    }

    /// rebuild the layer the latched registers describe
    pub fn decode(&self) -> Result<(LayerDescriptor, LayerAddresses), ConfigError> {
        let desc = LayerDescriptor {
            kind: LayerKind::from_code(self.layer_type)?,
            in_channels: self.in_channels as usize,
            out_channels: self.out_channels as usize,
            in_height: self.in_height as usize,
            in_width: self.in_width as usize,
            kernel_size: self.kernel_size as usize,
            stride: self.stride as usize,
            padding: self.padding as usize,
            global_pool: self.global_pool != 0,
        };
        let addrs = LayerAddresses {
            input: self.input_fm,
            output: self.output_fm,
            weights: self.weights,
            norm_scale: self.norm_scale,
            norm_shift: self.norm_shift,
        };
        Ok((desc, addrs))
    }
}
