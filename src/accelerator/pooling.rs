//! # Description
//! - the second pass over a finished convolution output: 2x2/stride 2 max pooling or global average pooling.
//! - both modes run one channel at a time and compact their result in place into the start of the
//!   output region. every write lands at or below the lowest index still to be read.
use log::trace;

use super::{
    fixed_point::Data,
    memory::DeviceMemory,
};
use crate::{
    error::{AccelError, ConfigError},
    layer::{LayerDescriptor, PoolMode},
    tensor::{Shape, Tensor, ELEMENT_BYTES},
};

pub fn max4(a: Data, b: Data, c: Data, d: Data) -> Data {
    a.max(b).max(c.max(d))
}

/// mean of `count` values whose raw Q8.8 sum is `sum`.
/// the sum is exact, the division rounds to nearest with ties towards positive infinity.
pub fn average(sum: i64, count: usize) -> Data {
    let count = count.max(1) as i64;
    Data::from_raw_saturating((2 * sum + count).div_euclid(2 * count))
}

/// pool channel `c` of the planar buffer `buf` with shape `shape`,
/// the pooled plane is stored at channel `c` of the half sized layout
pub fn max_pool_channel_in_place(buf: &mut [Data], shape: Shape, c: usize) {
    let (pooled_h, pooled_w) = (shape.height / 2, shape.width / 2);
    for oh in 0..pooled_h {
        for ow in 0..pooled_w {
            let top = shape.index(c, 2 * oh, 2 * ow);
            let bottom = top + shape.width;
            buf[(c * pooled_h + oh) * pooled_w + ow] =
                max4(buf[top], buf[top + 1], buf[bottom], buf[bottom + 1]);
        }
    }
}

/// reduce channel `c` to its mean and store it at index `c`
pub fn global_avg_channel_in_place(buf: &mut [Data], shape: Shape, c: usize) {
    let plane = shape.plane();
    let sum: i64 = buf[c * plane..(c + 1) * plane]
        .iter()
        .map(|x| x.raw() as i64)
        .sum();
    buf[c] = average(sum, plane);
}

pub fn max_pool_2x2(input: &Tensor<Data>) -> Result<Tensor<Data>, ConfigError> {
    let shape = input.shape();
    if shape.height % 2 != 0 || shape.width % 2 != 0 {
        return Err(ConfigError::OddPoolDimensions {
            height: shape.height,
            width: shape.width,
        });
    }
    let mut data = input.as_slice().to_vec();
    for c in 0..shape.channels {
        max_pool_channel_in_place(&mut data, shape, c);
    }
    let pooled = Shape::new(shape.channels, shape.height / 2, shape.width / 2);
    data.truncate(pooled.len());
    Tensor::from_vec(pooled, data)
}

pub fn global_avg_pool(input: &Tensor<Data>) -> Tensor<Data> {
    let shape = input.shape();
    let mut data = input.as_slice().to_vec();
    for c in 0..shape.channels {
        global_avg_channel_in_place(&mut data, shape, c);
    }
    Tensor::from_fn(Shape::new(shape.channels, 1, 1), |c, _, _| data[c])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingStage;

impl PoolingStage {
    /// pool one channel of the layer's output region in place
    pub fn pool_channel(
        &self,
        memory: &mut DeviceMemory,
        output_addr: u64,
        desc: &LayerDescriptor,
        c: usize,
    ) -> Result<(), AccelError> {
        let conv = desc.conv_shape();
        let buf = memory.slice_mut(output_addr, conv.len())?;
        let written = match desc.pool_mode() {
            PoolMode::None => return Ok(()),
            PoolMode::Max2x2 => {
                max_pool_channel_in_place(buf, conv, c);
                conv.plane() / 4
            }
            PoolMode::GlobalAverage => {
                global_avg_channel_in_place(buf, conv, c);
                1
            }
        };
        trace!("pooled channel {} of {:?}", c, conv);
        let plane_bytes = conv.plane() as u64 * ELEMENT_BYTES;
        memory.record_read(output_addr + c as u64 * plane_bytes, conv.plane());
        memory.record_write(
            output_addr + (c * written) as u64 * ELEMENT_BYTES,
            written,
        );
        Ok(())
    }
}
