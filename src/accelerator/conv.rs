//! # Description
//! - the convolution accumulator: loads one input channel group and its weights into the tile buffers
//!   and adds the group's contribution into the accumulator tile.
//! - every product is exact, the running sums saturate at the accumulator range.
//! - output channels are processed `lanes` at a time, the lane count never changes the result.
use log::trace;

use super::{
    fixed_point::{Acc, Data},
    memory::DeviceMemory,
    tile_scheduler::{InputGroup, OutputTile},
};
use crate::{error::AccelError, layer::LayerDescriptor, tensor::ELEMENT_BYTES};

#[derive(Debug, Clone, Copy)]
pub struct ConvAccumulator {
    lanes: usize,
}

impl ConvAccumulator {
    pub fn new(lanes: usize) -> Self {
        ConvAccumulator {
            lanes: lanes.max(1),
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// copy the halo window of one input channel group into `dst`,
    /// positions outside the input tensor are filled with zeros
    pub fn load_input(
        &self,
        memory: &mut DeviceMemory,
        input_addr: u64,
        desc: &LayerDescriptor,
        group: &InputGroup,
        dst: &mut [Data],
    ) -> Result<(), AccelError> {
        let (in_h, in_w) = (desc.in_height as isize, desc.in_width as isize);
        let halo_w = group.halo_width();
        let valid_start = group.iw_start.max(0);
        let valid_end = group.iw_end.min(in_w);
        for (rows, ic) in dst
            .chunks_mut(group.halo_height() * halo_w)
            .zip(group.ic_start..group.ic_end)
        {
            for (row, ih) in rows.chunks_mut(halo_w).zip(group.ih_start..group.ih_end) {
                if ih < 0 || ih >= in_h || valid_start >= valid_end {
                    row.fill(Data::ZERO);
                    continue;
                }
                let left = (valid_start - group.iw_start) as usize;
                let right = (valid_end - group.iw_start) as usize;
                row[..left].fill(Data::ZERO);
                row[right..].fill(Data::ZERO);
                let element = (ic as isize * in_h + ih) * in_w + valid_start;
                memory.read(
                    input_addr + element as u64 * ELEMENT_BYTES,
                    &mut row[left..right],
                )?;
            }
        }
        Ok(())
    }

    /// copy the weights of `tile`'s output channels for `group`'s input channels,
    /// laid out as (output channel, group channel, kernel row, kernel column)
    pub fn load_weights(
        &self,
        memory: &mut DeviceMemory,
        weight_addr: u64,
        desc: &LayerDescriptor,
        tile: &OutputTile,
        group: &InputGroup,
        dst: &mut [Data],
    ) -> Result<(), AccelError> {
        let kk = desc.kernel_size * desc.kernel_size;
        for (block, oc) in dst
            .chunks_mut(group.channels() * kk)
            .zip(tile.oc_start..tile.oc_end)
        {
            let element = (oc * desc.in_channels + group.ic_start) * kk;
            memory.read(weight_addr + element as u64 * ELEMENT_BYTES, block)?;
        }
        Ok(())
    }

    /// add the contribution of one loaded group into `acc`, returns the number of multiply-accumulates
    pub fn accumulate(
        &self,
        desc: &LayerDescriptor,
        tile: &OutputTile,
        group: &InputGroup,
        input: &[Data],
        weights: &[Data],
        acc: &mut [Acc],
    ) -> u64 {
        let (k, s) = (desc.kernel_size, desc.stride);
        let (tile_h, tile_w) = (tile.height(), tile.width());
        let plane = tile_h * tile_w;
        let (halo_h, halo_w) = (group.halo_height(), group.halo_width());
        let g = group.channels();
        let kk = k * k;
        if group.is_first {
            acc.fill(Acc::ZERO);
        }
        for (chunk_index, acc_chunk) in acc.chunks_mut(self.lanes * plane).enumerate() {
            let first_oc = chunk_index * self.lanes;
            let lanes_here = acc_chunk.len() / plane;
            for oh in 0..tile_h {
                for ow in 0..tile_w {
                    for lane in 0..lanes_here {
                        let w_oc = &weights[(first_oc + lane) * g * kk..][..g * kk];
                        let mut sum = acc_chunk[lane * plane + oh * tile_w + ow];
                        for ic in 0..g {
                            for kh in 0..k {
                                let x_row = &input[(ic * halo_h + oh * s + kh) * halo_w + ow * s..];
                                let w_row = &w_oc[(ic * k + kh) * k..];
                                for kw in 0..k {
                                    let product: Acc = x_row[kw].mul(w_row[kw]);
                                    sum = sum.saturating_add(product);
                                }
                            }
                        }
                        acc_chunk[lane * plane + oh * tile_w + ow] = sum;
                    }
                }
            }
        }
        let macs = (tile.channels() * plane * g * kk) as u64;
        trace!("group {:?}: {} macs", group.id, macs);
        macs
    }
}
