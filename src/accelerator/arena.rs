//! # Description
//! - the on-chip buffers of the accelerator, allocated once at the tile capacity.
//! - every tile step borrows views of the leading part of each buffer, nothing is allocated per tile.
use super::fixed_point::{Acc, Data};
use crate::layer::{MAX_CHANNELS, MAX_INPUT_SIZE};

#[derive(Debug, Clone)]
pub struct TileArena {
    capacity: usize,
    input: Vec<Data>,
    weights: Vec<Data>,
    acc: Vec<Acc>,
    norm_scale: Vec<Data>,
    norm_shift: Vec<Data>,
    row: Vec<Data>,
}

/// the buffers used by one accumulation step
pub struct AccumulateViews<'a> {
    pub input: &'a mut [Data],
    pub weights: &'a mut [Data],
    pub acc: &'a mut [Acc],
}

/// the buffers used when a finished tile is committed
pub struct CommitViews<'a> {
    pub acc: &'a [Acc],
    pub norm_scale: &'a mut [Data],
    pub norm_shift: &'a mut [Data],
    pub row: &'a mut [Data],
}

impl TileArena {
    pub fn new(capacity: usize) -> Self {
        let channels = capacity.min(MAX_CHANNELS);
        TileArena {
            capacity,
            input: vec![Data::ZERO; capacity],
            weights: vec![Data::ZERO; capacity],
            acc: vec![Acc::ZERO; capacity],
            norm_scale: vec![Data::ZERO; channels],
            norm_shift: vec![Data::ZERO; channels],
            // padding can make a row two elements wider than the input
            row: vec![Data::ZERO; capacity.min(MAX_INPUT_SIZE + 2)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// panics if a length exceeds the capacity, the tile scheduler never produces such a tile
    pub fn accumulate_views(
        &mut self,
        input_len: usize,
        weight_len: usize,
        acc_len: usize,
    ) -> AccumulateViews<'_> {
        AccumulateViews {
            input: &mut self.input[..input_len],
            weights: &mut self.weights[..weight_len],
            acc: &mut self.acc[..acc_len],
        }
    }

    pub fn commit_views(&mut self, acc_len: usize, channels: usize, width: usize) -> CommitViews<'_> {
        CommitViews {
            acc: &self.acc[..acc_len],
            norm_scale: &mut self.norm_scale[..channels],
            norm_shift: &mut self.norm_shift[..channels],
            row: &mut self.row[..width],
        }
    }
}
