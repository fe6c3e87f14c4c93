pub mod api;
pub mod aws;
pub mod config;
pub mod dispatcher;
pub mod orchestrator;
pub mod s3_uploader;
pub mod signals;
pub mod supervisor;
pub mod transcoder;
pub mod utilities;
