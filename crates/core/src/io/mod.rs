//! GeoTIFF reading and writing
//!
//! Local files are decoded with the `tiff` crate (`reader`) and written as
//! tiled GeoTIFFs (`writer`). The byte-level pieces (`ifd`, `layout`,
//! `codec`) serve the remote COG reader in `clearsky-cloud`, which fetches
//! headers and blocks by HTTP range instead of seeking a file.

pub mod codec;
pub mod geokeys;
pub mod ifd;
pub mod layout;
pub mod reader;
pub mod writer;

pub use geokeys::GeoTiffMeta;
pub use layout::{BlockRef, ImageLayout};
pub use reader::{read_geotiff, read_stack, verify_geotiff, ChunkLayout, GeoTiffReader};
pub use writer::{
    write_atomic, write_geotiff, write_stack, write_stack_rows, Compression, GeoTiffOptions, RowSink, StackHeader,
};
