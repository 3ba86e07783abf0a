pub mod chunk;
pub mod layout;

pub use chunk::{Chunk, DataPtr};
