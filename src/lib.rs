pub mod cli;
pub mod config;
pub mod normalize;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod window;
