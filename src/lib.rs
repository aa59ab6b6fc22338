//! Log-polar (foveated) image transform engine, renderer, and real-time
//! streaming server.

#[macro_use]
extern crate log;

pub mod cell_math;
pub mod client;
pub mod closing;
pub mod elapsedlogger;
pub mod error;
pub mod lpx_image;
pub mod protocol;
pub mod queue;
pub mod raster;
pub mod render;
pub mod scan;
pub mod scan_cache;
pub mod scan_tables;
pub mod server;

pub use error::{Error, Result};
