pub mod engine;
pub mod structures;
pub mod transform;
