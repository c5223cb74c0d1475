mod blocks;
mod model;

pub use blocks::DoubleConv;
pub use model::Network;

/// Kernel and stride of the max pooling between encoder levels.
pub const POOL_SIZE: usize = 2;

/// Channel widths of the encoder levels: doubling from `min` while below `max`.
/// The bottleneck itself runs at `max`.
pub fn layer_sizes(min: usize, max: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut size = min.max(1);
    while size < max {
        sizes.push(size);
        size *= 2;
    }
    sizes
}
