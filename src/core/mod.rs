pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod frames;
pub mod line_decoder;
pub mod message;
pub mod sanitize;
pub mod snapshot;
pub mod store;
pub mod stream_error;
