//! # Description
//! - partitions one layer into output tiles and input channel groups that fit the on-chip buffers.
//! - [`OutputTileIterator`] walks the output tiles, output channel tiles outermost, then tile rows, then tile columns.
//! - every output tile yields an [`InputGroupIterator`] over the input channel groups in ascending order.
//!
//! # Buffers
//! one capacity bounds three buffers at the same time:
//! - the accumulator tile: `channels * height * width`
//! - the input halo tile: `group * ((height - 1) * stride + k) * ((width - 1) * stride + k)`
//! - the weight tile: `channels * group * k * k`
use std::cmp;

use log::debug;
use serde::Serialize;

use super::tile_id::TileId;
use crate::{error::ConfigError, layer::LayerDescriptor, settings::AcceleratorSettings};

/// the nominal extent of every tile, partial tiles at the borders are clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub group_channels: usize,
}

impl TileShape {
    pub fn accumulator_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn input_len(&self, kernel: usize, stride: usize) -> usize {
        self.group_channels
            * halo_extent(self.height, kernel, stride)
            * halo_extent(self.width, kernel, stride)
    }

    pub fn weight_len(&self, kernel: usize) -> usize {
        self.channels * self.group_channels * kernel * kernel
    }

    /// the largest of the three buffer requirements
    pub fn required(&self, kernel: usize, stride: usize) -> usize {
        self.accumulator_len()
            .max(self.input_len(kernel, stride))
            .max(self.weight_len(kernel))
    }
}

/// number of input rows (or columns) an output span of `len` reads
fn halo_extent(len: usize, kernel: usize, stride: usize) -> usize {
    (len.max(1) - 1) * stride + kernel
}

fn halve(value: usize) -> usize {
    (value + 1) / 2
}

/// pick the tile shape for one layer: start from the configured nominal shape and shrink
/// until all three buffers fit. input groups shrink first, then output channels, then space.
pub fn plan_tile(
    desc: &LayerDescriptor,
    settings: &AcceleratorSettings,
) -> Result<TileShape, ConfigError> {
    let capacity = settings.tile_capacity;
    let (k, s) = (desc.kernel_size, desc.stride);
    let minimal = TileShape {
        channels: 1,
        height: 1,
        width: 1,
        group_channels: 1,
    };
    if minimal.required(k, s) > capacity {
        return Err(ConfigError::TileDoesNotFit {
            required: minimal.required(k, s),
            capacity,
        });
    }
    let mut shape = TileShape {
        channels: settings.tile_channels.min(desc.out_channels).max(1),
        height: settings.tile_height.min(desc.conv_height()).max(1),
        width: settings.tile_width.min(desc.conv_width()).max(1),
        group_channels: settings.tile_channels.min(desc.in_channels).max(1),
    };
    loop {
        let acc_fits = shape.accumulator_len() <= capacity;
        let input_fits = shape.input_len(k, s) <= capacity;
        let weight_fits = shape.weight_len(k) <= capacity;
        if acc_fits && input_fits && weight_fits {
            debug!("tile shape for {:?}: {:?}", desc, shape);
            return Ok(shape);
        }
        if (!weight_fits || !input_fits) && shape.group_channels > 1 {
            shape.group_channels = halve(shape.group_channels);
        } else if (!weight_fits || !acc_fits) && shape.channels > 1 {
            shape.channels = halve(shape.channels);
        } else if shape.height > 1 && (shape.height >= shape.width || shape.width == 1) {
            shape.height = halve(shape.height);
        } else if shape.width > 1 {
            shape.width = halve(shape.width);
        } else if shape.channels > 1 {
            shape.channels = halve(shape.channels);
        } else {
            return Err(ConfigError::TileDoesNotFit {
                required: shape.required(k, s),
                capacity,
            });
        }
    }
}

/// # Description
/// - one output tile: half open ranges over output channels, rows and columns of the convolution result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTile {
    pub id: TileId,
    pub oc_start: usize,
    pub oc_end: usize,
    pub oh_start: usize,
    pub oh_end: usize,
    pub ow_start: usize,
    pub ow_end: usize,
    pub is_final_tile: bool,
}

impl OutputTile {
    pub fn channels(&self) -> usize {
        self.oc_end - self.oc_start
    }
    pub fn height(&self) -> usize {
        self.oh_end - self.oh_start
    }
    pub fn width(&self) -> usize {
        self.ow_end - self.ow_start
    }
    pub fn len(&self) -> usize {
        self.channels() * self.height() * self.width()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// # Description
/// - one input channel group of an output tile, with the halo window it reads.
/// - the halo is in input coordinates and may reach outside the tensor, those positions read as zero.
/// # Fields
/// - `is_first`: the accumulator tile must be cleared before this group
/// - `is_last`: the accumulator tile is complete after this group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputGroup {
    pub id: TileId,
    pub ic_start: usize,
    pub ic_end: usize,
    pub ih_start: isize,
    pub ih_end: isize,
    pub iw_start: isize,
    pub iw_end: isize,
    pub is_first: bool,
    pub is_last: bool,
}

impl InputGroup {
    pub fn channels(&self) -> usize {
        self.ic_end - self.ic_start
    }
    pub fn halo_height(&self) -> usize {
        (self.ih_end - self.ih_start) as usize
    }
    pub fn halo_width(&self) -> usize {
        (self.iw_end - self.iw_start) as usize
    }
    pub fn len(&self) -> usize {
        self.channels() * self.halo_height() * self.halo_width()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// # Description
/// - the validated tiling of one layer, [`TileScheduler::tiles`] can be called any number of times
#[derive(Debug, Clone)]
pub struct TileScheduler {
    desc: LayerDescriptor,
    shape: TileShape,
    layer_id: usize,
}

impl TileScheduler {
    pub fn new(
        desc: &LayerDescriptor,
        settings: &AcceleratorSettings,
        layer_id: usize,
    ) -> Result<Self, ConfigError> {
        let shape = desc.validate(settings)?;
        Ok(TileScheduler {
            desc: *desc,
            shape,
            layer_id,
        })
    }

    pub fn descriptor(&self) -> &LayerDescriptor {
        &self.desc
    }

    pub fn tile_shape(&self) -> TileShape {
        self.shape
    }

    /// number of tiles along output channels, rows and columns
    pub fn tile_counts(&self) -> (usize, usize, usize) {
        (
            div_ceil(self.desc.out_channels, self.shape.channels),
            div_ceil(self.desc.conv_height(), self.shape.height),
            div_ceil(self.desc.conv_width(), self.shape.width),
        )
    }

    pub fn num_tiles(&self) -> usize {
        let (c, h, w) = self.tile_counts();
        c * h * w
    }

    pub fn groups_per_tile(&self) -> usize {
        div_ceil(self.desc.in_channels, self.shape.group_channels)
    }

    /// every (tile, group) pair is one accumulation step
    pub fn num_steps(&self) -> usize {
        self.num_tiles() * self.groups_per_tile()
    }

    pub fn tiles(&self) -> OutputTileIterator {
        OutputTileIterator {
            desc: self.desc,
            shape: self.shape,
            counts: self.tile_counts(),
            task_id: TileId::new(self.layer_id, 0, 0),
        }
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[derive(Debug, Clone)]
pub struct OutputTileIterator {
    desc: LayerDescriptor,
    shape: TileShape,
    counts: (usize, usize, usize),
    task_id: TileId,
}

impl Iterator for OutputTileIterator {
    type Item = InputGroupIterator;

    fn next(&mut self) -> Option<Self::Item> {
        let (oc_tiles, oh_tiles, ow_tiles) = self.counts;
        let total = oc_tiles * oh_tiles * ow_tiles;
        let index = self.task_id.output_id;
        if index >= total {
            return None;
        }
        let oc_tile = index / (oh_tiles * ow_tiles);
        let oh_tile = index / ow_tiles % oh_tiles;
        let ow_tile = index % ow_tiles;

        let oc_start = oc_tile * self.shape.channels;
        let oh_start = oh_tile * self.shape.height;
        let ow_start = ow_tile * self.shape.width;
        let tile = OutputTile {
            id: self.task_id,
            oc_start,
            oc_end: cmp::min(oc_start + self.shape.channels, self.desc.out_channels),
            oh_start,
            oh_end: cmp::min(oh_start + self.shape.height, self.desc.conv_height()),
            ow_start,
            ow_end: cmp::min(ow_start + self.shape.width, self.desc.conv_width()),
            is_final_tile: index + 1 == total,
        };
        debug!("output tile {:?}", tile);
        self.task_id.output_id += 1;
        Some(InputGroupIterator {
            tile,
            desc: self.desc,
            group_channels: self.shape.group_channels,
            next_ic: 0,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (c, h, w) = self.counts;
        let left = (c * h * w).saturating_sub(self.task_id.output_id);
        (left, Some(left))
    }
}

/// # Description
/// - the input channel groups of one output tile
#[derive(Debug, Clone)]
pub struct InputGroupIterator {
    tile: OutputTile,
    desc: LayerDescriptor,
    group_channels: usize,
    next_ic: usize,
}

impl InputGroupIterator {
    pub fn tile(&self) -> &OutputTile {
        &self.tile
    }
}

impl Iterator for InputGroupIterator {
    type Item = InputGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_ic >= self.desc.in_channels {
            return None;
        }
        let ic_start = self.next_ic;
        let ic_end = cmp::min(ic_start + self.group_channels, self.desc.in_channels);
        let (k, s, p) = (
            self.desc.kernel_size as isize,
            self.desc.stride as isize,
            self.desc.padding as isize,
        );
        let group = InputGroup {
            id: TileId {
                group_id: ic_start / self.group_channels,
                ..self.tile.id
            },
            ic_start,
            ic_end,
            ih_start: self.tile.oh_start as isize * s - p,
            ih_end: (self.tile.oh_end as isize - 1) * s + k - p,
            iw_start: self.tile.ow_start as isize * s - p,
            iw_end: (self.tile.ow_end as isize - 1) * s + k - p,
            is_first: ic_start == 0,
            is_last: ic_end == self.desc.in_channels,
        };
        self.next_ic = ic_end;
        Some(group)
    }
}

#[cfg(test)]
mod test {
    use itertools::iproduct;

    use super::*;
    use crate::layer::LayerKind;

    fn settings(capacity: usize) -> AcceleratorSettings {
        AcceleratorSettings {
            tile_capacity: capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_tiles_partition_output() -> Result<(), ConfigError> {
        for (k, s, capacity) in iproduct!([1, 3], [1, 2], [9, 50, 400, 9216]) {
            let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 5, 7, 11, 9, k, s, k / 2);
            let scheduler = TileScheduler::new(&desc, &settings(capacity), 0)?;
            let conv = desc.conv_shape();
            let mut covered = vec![0usize; conv.len()];
            for groups in scheduler.tiles() {
                let tile = *groups.tile();
                let mut channels_seen = 0;
                for group in groups {
                    assert!(group.len() <= capacity);
                    assert!(tile.channels() * group.channels() * k * k <= capacity);
                    assert_eq!(group.ic_start, channels_seen);
                    channels_seen = group.ic_end;
                }
                assert_eq!(channels_seen, desc.in_channels);
                assert!(tile.len() <= capacity);
                for (c, h, w) in iproduct!(
                    tile.oc_start..tile.oc_end,
                    tile.oh_start..tile.oh_end,
                    tile.ow_start..tile.ow_end
                ) {
                    covered[conv.index(c, h, w)] += 1;
                }
            }
            assert!(covered.iter().all(|&n| n == 1), "k{} s{} c{}", k, s, capacity);
        }
        Ok(())
    }

    #[test]
    fn test_traversal_order() -> Result<(), ConfigError> {
        let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 4, 4, 4, 4, 1, 1, 0);
        let scheduler = TileScheduler::new(
            &desc,
            &AcceleratorSettings {
                tile_capacity: 64,
                tile_channels: 2,
                tile_height: 2,
                tile_width: 2,
                ..Default::default()
            },
            3,
        )?;
        assert_eq!(scheduler.tile_counts(), (2, 2, 2));
        let starts: Vec<_> = scheduler
            .tiles()
            .map(|groups| {
                let t = groups.tile();
                (t.oc_start, t.oh_start, t.ow_start)
            })
            .collect();
        assert_eq!(
            starts,
            vec![
                (0, 0, 0),
                (0, 0, 2),
                (0, 2, 0),
                (0, 2, 2),
                (2, 0, 0),
                (2, 0, 2),
                (2, 2, 0),
                (2, 2, 2)
            ]
        );
        let mut tiles = scheduler.tiles();
        let last = tiles.nth(7).map(|groups| *groups.tile());
        assert!(last.map(|t| t.is_final_tile).unwrap_or(false));
        assert!(tiles.next().is_none());

        let groups: Vec<_> = scheduler.tiles().next().into_iter().flatten().collect();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].is_first && !groups[0].is_last);
        assert!(!groups[1].is_first && groups[1].is_last);
        assert_eq!(groups[1].id, TileId::new(3, 0, 1));
        Ok(())
    }

    #[test]
    fn test_restartable() -> Result<(), ConfigError> {
        let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 3, 16, 8, 8, 3, 1, 1);
        let scheduler = TileScheduler::new(&desc, &settings(64), 0)?;
        let first: Vec<_> = scheduler.tiles().flatten().collect();
        let second: Vec<_> = scheduler.tiles().flatten().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), scheduler.num_steps());
        Ok(())
    }

    #[test]
    fn test_halo_bounds() -> Result<(), ConfigError> {
        let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 2, 2, 8, 8, 3, 2, 1);
        let scheduler = TileScheduler::new(
            &desc,
            &AcceleratorSettings {
                tile_capacity: 1024,
                tile_channels: 2,
                tile_height: 2,
                tile_width: 4,
                ..Default::default()
            },
            0,
        )?;
        let Some(group) = scheduler.tiles().next().and_then(|mut g| g.next()) else {
            panic!("the first tile has no input group");
        };
        assert_eq!((group.ih_start, group.ih_end), (-1, 4));
        assert_eq!((group.iw_start, group.iw_end), (-1, 8));
        assert_eq!(group.halo_height(), 5);
        assert_eq!(group.halo_width(), 9);
        Ok(())
    }

    #[test]
    fn test_minimal_tile() {
        let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 64, 64, 16, 16, 3, 1, 1);
        assert_eq!(
            plan_tile(&desc, &settings(8)),
            Err(ConfigError::TileDoesNotFit {
                required: 9,
                capacity: 8
            })
        );
        let shape = plan_tile(&desc, &settings(9));
        assert_eq!(
            shape,
            Ok(TileShape {
                channels: 1,
                height: 1,
                width: 1,
                group_channels: 1
            })
        );
    }

    #[test]
    fn test_nominal_shape_kept_when_it_fits() {
        let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 64, 128, 28, 28, 3, 1, 1);
        let shape = plan_tile(&desc, &AcceleratorSettings::default());
        assert_eq!(
            shape,
            Ok(TileShape {
                channels: 32,
                height: 14,
                width: 14,
                group_channels: 32
            })
        );
    }
}
