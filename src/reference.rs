//! # floating point reference
//! - plain `f32` versions of every layer stage, used to check the fixed point pipeline.
//! - the leaky slope is the hardware's 0.125, not 0.1.
use crate::{
    layer::{LayerDescriptor, PoolMode},
    tensor::{NormParams, Shape, Tensor, WeightTensor},
};

pub const LEAKY_SLOPE: f32 = 0.125;

pub fn conv2d(input: &Tensor<f32>, weights: &WeightTensor, desc: &LayerDescriptor) -> Tensor<f32> {
    let (k, s, p) = (desc.kernel_size, desc.stride, desc.padding as isize);
    let in_shape = input.shape();
    Tensor::from_fn(desc.conv_shape(), |oc, oh, ow| {
        let mut sum = 0.0f32;
        for ic in 0..in_shape.channels {
            for kh in 0..k {
                for kw in 0..k {
                    let ih = (oh * s + kh) as isize - p;
                    let iw = (ow * s + kw) as isize - p;
                    if ih < 0
                        || iw < 0
                        || ih >= in_shape.height as isize
                        || iw >= in_shape.width as isize
                    {
                        continue;
                    }
                    sum += input.get(ic, ih as usize, iw as usize)
                        * weights.get(oc, ic, kh, kw).to_f32();
                }
            }
        }
        sum
    })
}

pub fn leaky_relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        x * LEAKY_SLOPE
    }
}

/// `leaky(x * scale[c] + shift[c])` in place
pub fn affine_leaky(tensor: &mut Tensor<f32>, norm: &NormParams) {
    let plane = tensor.shape().plane();
    for (c, values) in tensor.as_mut_slice().chunks_mut(plane).enumerate() {
        let (scale, shift) = (norm.scale[c].to_f32(), norm.shift[c].to_f32());
        for x in values {
            *x = leaky_relu(*x * scale + shift);
        }
    }
}

pub fn max_pool_2x2(input: &Tensor<f32>) -> Tensor<f32> {
    let shape = input.shape();
    Tensor::from_fn(
        Shape::new(shape.channels, shape.height / 2, shape.width / 2),
        |c, h, w| {
            input
                .get(c, 2 * h, 2 * w)
                .max(input.get(c, 2 * h, 2 * w + 1))
                .max(input.get(c, 2 * h + 1, 2 * w))
                .max(input.get(c, 2 * h + 1, 2 * w + 1))
        },
    )
}

pub fn global_avg_pool(input: &Tensor<f32>) -> Tensor<f32> {
    let shape = input.shape();
    let plane = shape.plane();
    Tensor::from_fn(Shape::new(shape.channels, 1, 1), |c, _, _| {
        input.as_slice()[c * plane..(c + 1) * plane].iter().sum::<f32>() / plane as f32
    })
}

/// one complete layer on the dequantized operands
pub fn layer(
    input: &Tensor<f32>,
    weights: &WeightTensor,
    norm: &NormParams,
    desc: &LayerDescriptor,
) -> Tensor<f32> {
    let mut out = conv2d(input, weights, desc);
    if desc.kind.uses_norm() {
        affine_leaky(&mut out, norm);
    }
    match desc.pool_mode() {
        PoolMode::None => out,
        PoolMode::Max2x2 => max_pool_2x2(&out),
        PoolMode::GlobalAverage => global_avg_pool(&out),
    }
}

/// largest absolute element-wise difference
pub fn max_abs_diff(a: &Tensor<f32>, b: &Tensor<f32>) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}
