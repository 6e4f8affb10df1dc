//! Hadris is a unified package containing different implementations for file systems.
//!
//! Currently, the only supported file system is UDF (Universal Disk Format).

#[cfg(feature = "udf")]
pub use hadris_udf as udf;
