pub mod clip;
pub mod config;
pub mod error;
pub mod types;

pub use clip::{ClipDescriptor, ClipList, ClipRole};
pub use config::{AlphaFillConfig, AlphaFillOverride, KeyColor, StyleConfig};
pub use error::{CoreError, Result};
pub use types::*;
