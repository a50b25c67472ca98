//! # the network layer table
//! - an ordered list of layers, each with the byte offsets of its weights and norm parameters.
//! - offsets left out of a table file continue right after the previous layer's parameters.
//! - every layer must consume exactly the tensor the previous layer produces.
use config::{Config, File};
use log::debug;
use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::{
    error::ConfigError,
    layer::{LayerDescriptor, LayerKind},
    settings::AcceleratorSettings,
    tensor::Shape,
};

/// one layer as written in a table file
#[derive(Debug, Clone, Deserialize)]
struct LayerRecord {
    kind: LayerKind,
    in_channels: usize,
    out_channels: usize,
    in_height: usize,
    in_width: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    #[serde(default)]
    global_pool: bool,
    #[serde(default)]
    weight_offset: Option<u64>,
    #[serde(default)]
    norm_offset: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct NetworkFile {
    name: String,
    layers: Vec<LayerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerEntry {
    pub descriptor: LayerDescriptor,
    /// byte offset into the weight store
    pub weight_offset: u64,
    /// byte offset into both the scale store and the shift store
    pub norm_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkTable {
    pub name: String,
    pub layers: Vec<LayerEntry>,
}

impl NetworkTable {
    /// # Description
    /// - read a table from a toml file with a `name` and a `[[layers]]` array
    pub fn new(path: &str) -> Result<Self, Box<dyn Error>> {
        let file: NetworkFile = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;
        let records = file
            .layers
            .iter()
            .map(|r| {
                let descriptor = LayerDescriptor {
                    kind: r.kind,
                    in_channels: r.in_channels,
                    out_channels: r.out_channels,
                    in_height: r.in_height,
                    in_width: r.in_width,
                    kernel_size: r.kernel_size,
                    stride: r.stride,
                    padding: r.padding,
                    global_pool: r.global_pool,
                };
                (descriptor, r.weight_offset, r.norm_offset)
            })
            .collect::<Vec<_>>();
        Ok(Self::with_offsets(&file.name, &records)?)
    }

    /// a table whose parameters are packed back to back
    pub fn from_descriptors(
        name: &str,
        descriptors: &[LayerDescriptor],
    ) -> Result<Self, ConfigError> {
        let records: Vec<_> = descriptors.iter().map(|d| (*d, None, None)).collect();
        Self::with_offsets(name, &records)
    }

    /// resolve missing offsets and check that the layers chain
    pub fn with_offsets(
        name: &str,
        records: &[(LayerDescriptor, Option<u64>, Option<u64>)],
    ) -> Result<Self, ConfigError> {
        if records.is_empty() {
            return Err(ConfigError::EmptyNetwork);
        }
        let mut layers = Vec::with_capacity(records.len());
        let (mut next_weight, mut next_norm) = (0, 0);
        let mut previous: Option<Shape> = None;
        for (index, (descriptor, weight_offset, norm_offset)) in records.iter().enumerate() {
            descriptor.check_dimensions()?;
            if let Some(shape) = previous {
                if shape != descriptor.input_shape() {
                    return Err(ConfigError::LayerChain {
                        layer: index,
                        expected: descriptor.input_shape().as_tuple(),
                        actual: shape.as_tuple(),
                    });
                }
            }
            let weight_offset = weight_offset.unwrap_or(next_weight);
            let norm_offset = norm_offset.unwrap_or(next_norm);
            next_weight = weight_offset + descriptor.weight_bytes();
            next_norm = norm_offset + descriptor.norm_bytes();
            previous = Some(descriptor.output_shape());
            debug!(
                "layer {}: weights at +{:#x}, norm at +{:#x}",
                index, weight_offset, norm_offset
            );
            layers.push(LayerEntry {
                descriptor: *descriptor,
                weight_offset,
                norm_offset,
            });
        }
        Ok(NetworkTable {
            name: name.to_string(),
            layers,
        })
    }

    /// # Description
    /// - the seven layer yolo-lite detector: 224x224x3 in, 7x7x125 out
    pub fn yolo_lite() -> Self {
        use LayerKind::*;
        let layers = [
            (ConvBnActPool, 3, 16, 224),
            (ConvBnActPool, 16, 32, 112),
            (ConvBnActPool, 32, 64, 56),
            (ConvBnActPool, 64, 128, 28),
            (ConvBnAct, 128, 256, 14),
            (ConvBnActPool, 256, 512, 14),
        ];
        let mut descriptors: Vec<_> = layers
            .iter()
            .map(|&(kind, c, k, size)| LayerDescriptor::new(kind, c, k, size, size, 3, 1, 1))
            .collect();
        descriptors.push(LayerDescriptor::new(ConvOnly, 512, 125, 7, 7, 1, 1, 0));
        let mut weight_offset = 0;
        let mut norm_offset = 0;
        let layers = descriptors
            .into_iter()
            .map(|descriptor| {
                let entry = LayerEntry {
                    descriptor,
                    weight_offset,
                    norm_offset,
                };
                weight_offset += descriptor.weight_bytes();
                norm_offset += descriptor.norm_bytes();
                entry
            })
            .collect();
        NetworkTable {
            name: "yolo_lite".to_string(),
            layers,
        }
    }

    pub fn input_shape(&self) -> Shape {
        self.layers
            .first()
            .map(|l| l.descriptor.input_shape())
            .unwrap_or_default()
    }

    pub fn output_shape(&self) -> Shape {
        self.layers
            .last()
            .map(|l| l.descriptor.output_shape())
            .unwrap_or_default()
    }

    /// size of the weight store the table addresses
    pub fn weight_bytes(&self) -> u64 {
        self.layers
            .iter()
            .map(|l| l.weight_offset + l.descriptor.weight_bytes())
            .max()
            .unwrap_or(0)
    }

    /// size of the scale store, the shift store has the same size
    pub fn norm_bytes(&self) -> u64 {
        self.layers
            .iter()
            .map(|l| l.norm_offset + l.descriptor.norm_bytes())
            .max()
            .unwrap_or(0)
    }

    /// size of one ping-pong region: the largest input or un-pooled output of any layer
    pub fn feature_map_bytes(&self) -> u64 {
        self.layers
            .iter()
            .map(|l| {
                l.descriptor
                    .input_shape()
                    .bytes()
                    .max(l.descriptor.conv_shape().bytes())
            })
            .max()
            .unwrap_or(0)
    }

    /// check every layer against the accelerator, including the tiling
    pub fn validate(&self, settings: &AcceleratorSettings) -> Result<(), ConfigError> {
        for entry in &self.layers {
            entry.descriptor.validate(settings)?;
        }
        Ok(())
    }
}
