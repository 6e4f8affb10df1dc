//! Endian-aware primitive wrappers used by every on-disk `#[repr(C)]`
//! structure in the workspace.
pub mod endian;
pub mod number;
