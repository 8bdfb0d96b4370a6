pub mod core;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod storage;
