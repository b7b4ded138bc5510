#![allow(clippy::too_many_arguments, clippy::needless_range_loop)]
// Client side of the protocol 34 network layer
pub mod client;
pub mod cl_ring;
pub mod cl_ents;
pub mod cl_parse;
pub mod cl_tent;
pub mod cl_pred;
pub mod cl_smooth;
pub mod cl_main;
pub mod cl_demo;

pub use cl_main::Client;
pub use cl_parse::{ClientCallbacks, NullCallbacks, ParseError};
