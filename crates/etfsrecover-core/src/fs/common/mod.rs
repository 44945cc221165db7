/// Shared image access helpers
pub mod types;

pub use types::{BlockDevice, ContentType, MagicDetector};
