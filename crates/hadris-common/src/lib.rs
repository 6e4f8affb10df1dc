/// Algorithms
pub mod alg;
/// Types
pub mod types;
