//! # layer descriptors
//! - [`LayerDescriptor`]: the immutable per-layer record issued to the accelerator.
//! - [`LayerAddresses`]: where the layer's tensors and parameters live in device memory.
//!
//! all checks that do not depend on the tile capacity live in [`LayerDescriptor::check_dimensions`],
//! [`LayerDescriptor::validate`] adds the tiling feasibility check.
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::{
    accelerator::tile_scheduler::{plan_tile, TileShape},
    error::ConfigError,
    settings::AcceleratorSettings,
    tensor::{Shape, ELEMENT_BYTES},
};

/// largest channel count the on-chip index registers can describe
pub const MAX_CHANNELS: usize = 512;
/// largest input height or width
pub const MAX_INPUT_SIZE: usize = 224;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumAsInner)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// convolution, folded batch norm, leaky activation
    ConvBnAct,
    /// like [`LayerKind::ConvBnAct`] followed by a 2x2 max pool
    ConvBnActPool,
    /// convolution only, used by the detection head
    ConvOnly,
}

impl LayerKind {
    /// the value written to the layer type register
    pub fn code(self) -> u32 {
        match self {
            LayerKind::ConvBnAct => 0,
            LayerKind::ConvBnActPool => 1,
            LayerKind::ConvOnly => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(LayerKind::ConvBnAct),
            1 => Ok(LayerKind::ConvBnActPool),
            2 => Ok(LayerKind::ConvOnly),
            _ => Err(ConfigError::UnknownLayerKind(code)),
        }
    }

    /// whether the fusion stage applies scale, shift and activation
    pub fn uses_norm(self) -> bool {
        !self.is_conv_only()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolMode {
    None,
    Max2x2,
    GlobalAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub kind: LayerKind,
    pub in_channels: usize,
    pub out_channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    /// reduce every output channel to its spatial mean after the convolution
    #[serde(default)]
    pub global_pool: bool,
}

impl LayerDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: LayerKind,
        in_channels: usize,
        out_channels: usize,
        in_height: usize,
        in_width: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        LayerDescriptor {
            kind,
            in_channels,
            out_channels,
            in_height,
            in_width,
            kernel_size,
            stride,
            padding,
            global_pool: false,
        }
    }

    pub fn with_global_pool(mut self) -> Self {
        self.global_pool = true;
        self
    }

    pub fn pool_mode(&self) -> PoolMode {
        if self.kind.is_conv_bn_act_pool() {
            PoolMode::Max2x2
        } else if self.global_pool {
            PoolMode::GlobalAverage
        } else {
            PoolMode::None
        }
    }

    pub fn conv_height(&self) -> usize {
        conv_extent(self.in_height, self.kernel_size, self.stride, self.padding)
    }

    pub fn conv_width(&self) -> usize {
        conv_extent(self.in_width, self.kernel_size, self.stride, self.padding)
    }

    pub fn input_shape(&self) -> Shape {
        Shape::new(self.in_channels, self.in_height, self.in_width)
    }

    /// shape of the convolution result before any pooling
    pub fn conv_shape(&self) -> Shape {
        Shape::new(self.out_channels, self.conv_height(), self.conv_width())
    }

    /// shape of the tensor the next layer consumes
    pub fn output_shape(&self) -> Shape {
        let conv = self.conv_shape();
        match self.pool_mode() {
            PoolMode::None => conv,
            PoolMode::Max2x2 => Shape::new(conv.channels, conv.height / 2, conv.width / 2),
            PoolMode::GlobalAverage => Shape::new(conv.channels, 1, 1),
        }
    }

    pub fn weight_len(&self) -> usize {
        self.out_channels * self.in_channels * self.kernel_size * self.kernel_size
    }

    pub fn weight_bytes(&self) -> u64 {
        self.weight_len() as u64 * ELEMENT_BYTES
    }

    /// one scale and one shift per output channel, this is the size of either vector
    pub fn norm_bytes(&self) -> u64 {
        self.out_channels as u64 * ELEMENT_BYTES
    }

    pub fn macs(&self) -> u64 {
        (self.conv_shape().len() * self.in_channels * self.kernel_size * self.kernel_size) as u64
    }

    /// everything that can be checked without knowing the tile capacity
    pub fn check_dimensions(&self) -> Result<(), ConfigError> {
        if !matches!(self.kernel_size, 1 | 3) {
            return Err(ConfigError::UnsupportedKernel(self.kernel_size));
        }
        if !matches!(self.stride, 1 | 2) {
            return Err(ConfigError::UnsupportedStride(self.stride));
        }
        if !matches!(self.padding, 0 | 1) {
            return Err(ConfigError::UnsupportedPadding(self.padding));
        }
        let dims = [
            ("in_channels", self.in_channels, MAX_CHANNELS),
            ("out_channels", self.out_channels, MAX_CHANNELS),
            ("in_height", self.in_height, MAX_INPUT_SIZE),
            ("in_width", self.in_width, MAX_INPUT_SIZE),
        ];
        for (name, value, max) in dims {
            if value == 0 {
                return Err(ConfigError::ZeroDimension { name });
            }
            if value > max {
                return Err(ConfigError::DimensionTooLarge { name, value, max });
            }
        }
        if self.in_height + 2 * self.padding < self.kernel_size
            || self.in_width + 2 * self.padding < self.kernel_size
        {
            return Err(ConfigError::EmptyOutput {
                kernel: self.kernel_size,
                height: self.in_height,
                width: self.in_width,
            });
        }
        if self.kind.is_conv_bn_act_pool() {
            if self.global_pool {
                return Err(ConfigError::ConflictingPoolModes);
            }
            let (height, width) = (self.conv_height(), self.conv_width());
            if height % 2 != 0 || width % 2 != 0 {
                return Err(ConfigError::OddPoolDimensions { height, width });
            }
        }
        Ok(())
    }

    /// full configuration check, returns the tile shape the scheduler will use
    pub fn validate(&self, settings: &AcceleratorSettings) -> Result<TileShape, ConfigError> {
        self.check_dimensions()?;
        plan_tile(self, settings)
    }
}

fn conv_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (input + 2 * padding).saturating_sub(kernel) / stride.max(1) + 1
}

/// byte addresses of everything one layer invocation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LayerAddresses {
    pub input: u64,
    pub output: u64,
    pub weights: u64,
    pub norm_scale: u64,
    pub norm_shift: u64,
}

impl LayerAddresses {
    /// the input tensor and the (un-pooled) output tensor must not share any byte
    pub fn check_disjoint(&self, desc: &LayerDescriptor) -> Result<(), ConfigError> {
        let input_end = self
            .input
            .checked_add(desc.input_shape().bytes())
            .ok_or(ConfigError::AddressOverflow(self.input))?;
        let output_end = self
            .output
            .checked_add(desc.conv_shape().bytes())
            .ok_or(ConfigError::AddressOverflow(self.output))?;
        if self.input < output_end && self.output < input_end {
            return Err(ConfigError::RegionOverlap {
                a_start: self.input,
                a_end: input_end,
                b_start: self.output,
                b_end: output_end,
            });
        }
        for addr in [
            self.input,
            self.output,
            self.weights,
            self.norm_scale,
            self.norm_shift,
        ] {
            if addr % ELEMENT_BYTES != 0 {
                return Err(ConfigError::Misaligned(addr));
            }
        }
        Ok(())
    }
}
