//! Host-side scene content: geometry, instance layout and per-frame uniforms.

pub mod animation;
pub mod grid;
pub mod mesh;
pub mod uniforms;

pub use animation::Animation;
pub use grid::{CellRect, InstanceGrid};
pub use mesh::{Mesh, Vertex};
pub use uniforms::{UniformArray, UniformBufferObject};
