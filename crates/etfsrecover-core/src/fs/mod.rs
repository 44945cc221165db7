/// On-flash layouts and image access
pub mod common;
pub mod etfs;

use std::path::Path;

use crate::error::Result;
use common::BlockDevice;

/// Get human-readable information about a NAND dump
pub fn get_filesystem_info(device_path: &Path) -> Result<String> {
    let device = BlockDevice::open(device_path)?;
    etfs::get_filesystem_info(&device)
}
