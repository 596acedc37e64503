pub mod bitmap;
pub mod color;
pub mod compositor;
pub mod container;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod lzw;

pub use bitmap::BitmapProvider;
pub use decoder::{Decoder, FramePrepareInfo, GifInfo};
pub use error::{GifError, Result};
pub use frame::Disposal;
