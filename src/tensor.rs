//! # host side tensors
//! - feature maps are planar: channel, then row, then column.
//! - weights are (out channel, in channel, kernel row, kernel column).
//! - [`NormParams`] hold the per-channel scale and shift of a folded batch norm.
use serde::{Deserialize, Serialize};

use crate::{accelerator::fixed_point::Data, error::ConfigError};

/// every stored element is one 16 bit fixed point word
pub const ELEMENT_BYTES: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Shape {
            channels,
            height,
            width,
        }
    }

    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    pub fn bytes(&self) -> u64 {
        self.len() as u64 * ELEMENT_BYTES
    }

    pub fn index(&self, c: usize, h: usize, w: usize) -> usize {
        (c * self.height + h) * self.width + w
    }

    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T = Data> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Copy + Default> Tensor<T> {
    pub fn zeros(shape: Shape) -> Self {
        Tensor {
            shape,
            data: vec![T::default(); shape.len()],
        }
    }

    pub fn from_vec(shape: Shape, data: Vec<T>) -> Result<Self, ConfigError> {
        if data.len() != shape.len() {
            return Err(ConfigError::ShapeMismatch {
                what: "tensor",
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Tensor { shape, data })
    }

    pub fn from_fn(shape: Shape, mut f: impl FnMut(usize, usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(shape.len());
        for c in 0..shape.channels {
            for h in 0..shape.height {
                for w in 0..shape.width {
                    data.push(f(c, h, w));
                }
            }
        }
        Tensor { shape, data }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn get(&self, c: usize, h: usize, w: usize) -> T {
        self.data[self.shape.index(c, h, w)]
    }

    pub fn set(&mut self, c: usize, h: usize, w: usize, value: T) {
        let index = self.shape.index(c, h, w);
        self.data[index] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn map<U: Copy + Default>(&self, f: impl FnMut(T) -> U) -> Tensor<U> {
        Tensor {
            shape: self.shape,
            data: self.data.iter().copied().map(f).collect(),
        }
    }
}

impl Tensor<Data> {
    pub fn quantize(values: &Tensor<f32>) -> Self {
        values.map(Data::from_f32)
    }

    pub fn to_f32(&self) -> Tensor<f32> {
        self.map(Data::to_f32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel_size: usize,
    data: Vec<Data>,
}

impl WeightTensor {
    pub fn from_vec(
        out_channels: usize,
        in_channels: usize,
        kernel_size: usize,
        data: Vec<Data>,
    ) -> Result<Self, ConfigError> {
        let expected = out_channels * in_channels * kernel_size * kernel_size;
        if data.len() != expected {
            return Err(ConfigError::ShapeMismatch {
                what: "weight tensor",
                expected,
                actual: data.len(),
            });
        }
        Ok(WeightTensor {
            out_channels,
            in_channels,
            kernel_size,
            data,
        })
    }

    pub fn from_fn(
        out_channels: usize,
        in_channels: usize,
        kernel_size: usize,
        mut f: impl FnMut(usize, usize, usize, usize) -> Data,
    ) -> Self {
        let mut data = Vec::with_capacity(out_channels * in_channels * kernel_size * kernel_size);
        for oc in 0..out_channels {
            for ic in 0..in_channels {
                for kh in 0..kernel_size {
                    for kw in 0..kernel_size {
                        data.push(f(oc, ic, kh, kw));
                    }
                }
            }
        }
        WeightTensor {
            out_channels,
            in_channels,
            kernel_size,
            data,
        }
    }

    pub fn get(&self, oc: usize, ic: usize, kh: usize, kw: usize) -> Data {
        let k = self.kernel_size;
        self.data[((oc * self.in_channels + ic) * k + kh) * k + kw]
    }

    pub fn as_slice(&self) -> &[Data] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// folded batch norm: `y = x * scale[c] + shift[c]`
#[derive(Debug, Clone, PartialEq)]
pub struct NormParams {
    pub scale: Vec<Data>,
    pub shift: Vec<Data>,
}

impl NormParams {
    pub fn new(scale: Vec<Data>, shift: Vec<Data>) -> Result<Self, ConfigError> {
        if scale.len() != shift.len() {
            return Err(ConfigError::ShapeMismatch {
                what: "norm shift",
                expected: scale.len(),
                actual: shift.len(),
            });
        }
        Ok(NormParams { scale, shift })
    }

    /// scale 1, shift 0 for every channel
    pub fn identity(channels: usize) -> Self {
        NormParams {
            scale: vec![Data::ONE; channels],
            shift: vec![Data::ZERO; channels],
        }
    }

    /// fold gamma, beta, running mean and running variance into one multiply-add per element:
    /// `scale = gamma / sqrt(var + eps)`, `shift = beta - mean * scale`
    pub fn fold(
        gamma: &[f32],
        beta: &[f32],
        mean: &[f32],
        variance: &[f32],
        eps: f32,
    ) -> Result<Self, ConfigError> {
        let channels = gamma.len();
        for (what, actual) in [
            ("batch norm beta", beta.len()),
            ("batch norm mean", mean.len()),
            ("batch norm variance", variance.len()),
        ] {
            if actual != channels {
                return Err(ConfigError::ShapeMismatch {
                    what,
                    expected: channels,
                    actual,
                });
            }
        }
        let mut scale = Vec::with_capacity(channels);
        let mut shift = Vec::with_capacity(channels);
        for c in 0..channels {
            let s = gamma[c] / (variance[c] + eps).sqrt();
            scale.push(Data::from_f32(s));
            shift.push(Data::from_f32(beta[c] - mean[c] * s));
        }
        Ok(NormParams { scale, shift })
    }

    pub fn len(&self) -> usize {
        self.scale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }
}
