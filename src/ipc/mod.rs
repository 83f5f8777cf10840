//! Local message channel between UI clients and the timer service.
//!
//! Each message is one line of JSON over a Unix domain socket. A connection
//! carries any number of request/response pairs, answered in order.

mod client;
mod server;

pub use client::IpcClient;
pub use server::{IpcServer, Services};
