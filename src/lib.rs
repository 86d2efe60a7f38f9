//! Palaver is a streaming chat client core for a remote conversational backend.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming pipeline (line decoding, frame assembly,
//!   session control) and the bounded, sanitizing conversation store with
//!   its snapshot storage.
//! - [`api`] defines the request and frame payloads exchanged with the
//!   backend.
//! - [`cli`] is a thin terminal front end over the library.
//! - [`utils`] holds logging setup and URL helpers.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
