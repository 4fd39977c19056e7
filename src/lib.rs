pub mod config;
pub mod error;
pub mod extract;
pub mod media;
pub mod params;
pub mod pipeline;
pub mod process;
pub mod routes;
pub mod transcode;
