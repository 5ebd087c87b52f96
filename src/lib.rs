pub mod common;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod mosaic;
pub mod naming;
pub mod raster;
pub mod semantics;
pub mod synth;
pub mod validate;
