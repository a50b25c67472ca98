use serde::Serialize;

/// # Description
/// - identifies one step of the traversal by layer, output tile and input channel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TileId {
    pub layer_id: usize,
    pub output_id: usize,
    pub group_id: usize,
}
impl TileId {
    pub fn new(layer_id: usize, output_id: usize, group_id: usize) -> Self {
        TileId {
            layer_id,
            output_id,
            group_id,
        }
    }
}
