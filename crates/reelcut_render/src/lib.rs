pub mod alpha;
pub mod arena;
pub mod chroma;
pub mod compose;
pub mod debug;
pub mod error;
pub mod fill;
pub mod normalize;
pub mod pipeline;
pub mod probe;
pub mod render;
pub mod toolkit;

#[cfg(test)]
mod testing;

pub use error::{RenderError, Result};
pub use pipeline::{process_clips, ComposedVideo};
pub use render::{RenderPlan, RenderProgress};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
