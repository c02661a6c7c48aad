pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod naming;
pub mod ocr;
pub mod pipeline;
pub mod raster;
pub mod request;
pub mod respond;
pub mod server;
pub mod splitter;
pub mod tracker;
pub mod util;
