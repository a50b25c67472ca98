//! # Description
//! - the fused epilogue of a tile: `leaky(acc * scale[c] + shift[c])` for normalized layers,
//!   a plain narrowing cast for `conv_only` layers.
//! - the affine transform and the activation run at accumulator precision,
//!   there is exactly one rounding into [`Data`] at the end.
//! - [`apply_activation`] is a standalone pass over a finished tensor, with a LUT sigmoid.
use log::trace;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{
    arena::CommitViews,
    fixed_point::{Acc, Data},
    memory::DeviceMemory,
    tile_scheduler::OutputTile,
};
use crate::{
    error::AccelError,
    layer::{LayerAddresses, LayerDescriptor, LayerKind},
    tensor::{Tensor, ELEMENT_BYTES},
};

/// negative inputs are scaled by `2^-LEAKY_SHIFT` = 0.125
pub const LEAKY_SHIFT: u32 = 3;

/// sigmoid table over [-8, 8) in steps of 1/16
pub const SIGMOID_LUT_SIZE: usize = 256;

pub fn leaky_relu(x: Acc) -> Acc {
    if x.is_negative() {
        x.shr(LEAKY_SHIFT)
    } else {
        x
    }
}

/// `acc * scale + shift`, kept at accumulator precision
pub fn normalize(acc: Acc, scale: Data, shift: Data) -> Acc {
    let scaled: Acc = acc.mul(scale);
    scaled.saturating_add(shift.convert())
}

/// the committed value of one accumulator element, the flag reports saturation of the narrowing
pub fn fuse(kind: LayerKind, acc: Acc, scale: Data, shift: Data) -> (Data, bool) {
    if kind.uses_norm() {
        leaky_relu(normalize(acc, scale, shift)).convert_checked()
    } else {
        acc.convert_checked()
    }
}

static SIGMOID_LUT: Lazy<[Data; SIGMOID_LUT_SIZE]> = Lazy::new(|| {
    let mut lut = [Data::ZERO; SIGMOID_LUT_SIZE];
    for (i, entry) in lut.iter_mut().enumerate() {
        let x = i as f64 / 16.0 - 8.0;
        *entry = Data::from_f64(1.0 / (1.0 + (-x).exp()));
    }
    lut
});

/// table sigmoid, inputs outside [-8, 8) use the nearest end of the table
pub fn sigmoid(x: Data) -> Data {
    let lo = -8 * Data::ONE.raw();
    let hi = 8 * Data::ONE.raw() - 1;
    let index = (x.raw().clamp(lo, hi) - lo) >> 4;
    SIGMOID_LUT[index as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    None,
    Leaky,
    Sigmoid,
}

/// apply an activation element-wise in place
pub fn apply_activation(tensor: &mut Tensor<Data>, activation: Activation) {
    let f: fn(Data) -> Data = match activation {
        Activation::None => return,
        Activation::Leaky => |x: Data| -> Data { leaky_relu(x.convert()).convert() },
        Activation::Sigmoid => sigmoid,
    };
    for x in tensor.as_mut_slice() {
        *x = f(*x);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FusionStage;

impl FusionStage {
    /// transform a complete accumulator tile and write it to the output tensor,
    /// returns how many elements saturated in the narrowing
    pub fn commit_tile(
        &self,
        memory: &mut DeviceMemory,
        addrs: &LayerAddresses,
        desc: &LayerDescriptor,
        tile: &OutputTile,
        views: CommitViews<'_>,
    ) -> Result<u64, AccelError> {
        let CommitViews {
            acc,
            norm_scale,
            norm_shift,
            row,
        } = views;
        let norm_offset = tile.oc_start as u64 * ELEMENT_BYTES;
        if desc.kind.uses_norm() {
            memory.read(addrs.norm_scale + norm_offset, norm_scale)?;
            memory.read(addrs.norm_shift + norm_offset, norm_shift)?;
        }
        let conv = desc.conv_shape();
        let plane = tile.height() * tile.width();
        let mut saturations = 0;
        for (c, acc_plane) in acc.chunks(plane).enumerate() {
            let (scale, shift) = if desc.kind.uses_norm() {
                (norm_scale[c], norm_shift[c])
            } else {
                (Data::ONE, Data::ZERO)
            };
            for (h, acc_row) in acc_plane.chunks(tile.width()).enumerate() {
                for (out, &value) in row.iter_mut().zip(acc_row) {
                    let (fused, clamped) = fuse(desc.kind, value, scale, shift);
                    *out = fused;
                    saturations += clamped as u64;
                }
                let element = conv.index(tile.oc_start + c, tile.oh_start + h, tile.ow_start);
                memory.write(addrs.output + element as u64 * ELEMENT_BYTES, row)?;
            }
        }
        if saturations > 0 {
            trace!("tile {:?}: {} saturated outputs", tile.id, saturations);
        }
        Ok(saturations)
    }
}
