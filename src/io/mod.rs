//! File I/O for voxel workspaces and conductivity results.
//!
//! Both formats are plain JSON so that jobs can be prepared and inspected
//! with any tool.

pub mod results;
pub mod voxels;

pub use results::{ResultFile, RunRecord, read_result, write_result};
pub use voxels::{VoxelFile, read_workspace, write_workspace};
