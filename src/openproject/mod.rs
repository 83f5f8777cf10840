//! Client for the OpenProject REST API (v3).

mod cached_client;
mod client;
pub mod duration;
mod types;

pub use cached_client::CachedOpenProjectClient;
pub use client::OpenProjectClient;
pub use types::{new_time_entry, Project, TimeEntry, WorkPackage};
