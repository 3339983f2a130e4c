//! Compressed-Record Codec Engine
//!
//! Packs fixed-schema records into bit-packed on-disk packets and streams
//! them back out through reader/writer sessions.
//!
//! - `bitpack` — LSB-first fixed-width bit runs
//! - `field` — prototype traversal, bit widths, scalar encode/decode
//! - `packet` — Data/Index/Empty packet framing
//! - `writer` / `reader` — stateful streaming sessions over one
//!   CompressedVector node

pub mod bitpack;
pub mod packet;

mod field;
mod reader;
mod writer;

pub use reader::CompressedVectorReader;
pub use writer::CompressedVectorWriter;
