//! Clipframe Container
//!
//! ISO base media (MP4) support for the transcode pipeline:
//! - **Reader:** box walking, sample table expansion, microsecond timestamps
//! - **Writer:** lazily configured tracks serialized to `ftyp`/`mdat`/`moov`
//! - **Remux:** keyframe-aligned passthrough trims without decode
//! - **Codec helpers:** avcC / esds records and RFC 6381 codec strings

pub mod aac;
pub mod avc;
pub mod boxes;
pub mod error;
pub mod reader;
pub mod remux;
pub mod synthetic;
pub mod writer;

pub use error::{ParseError, RemuxError, WriterError};
pub use reader::ContainerReader;
pub use remux::{PassthroughRemuxer, RemuxOutput};
pub use synthetic::SyntheticSource;
pub use writer::ContainerWriter;
