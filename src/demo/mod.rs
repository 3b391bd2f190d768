pub mod camera;
mod mesh;
mod triangle;

pub use mesh::MeshApp;
pub use triangle::TriangleApp;
