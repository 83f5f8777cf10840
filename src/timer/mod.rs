//! The work timer service.
//!
//! One service task owns the [`TimerState`]; every caller talks to it through
//! a cloneable [`TimerHandle`]. Commands are processed one at a time in the
//! order they were sent, and none is processed before the persisted state has
//! been loaded.

mod handle;
mod persist;
mod service;
mod state;

pub use handle::TimerHandle;
pub use service::spawn;
pub use state::{TimerSnapshot, TimerState};
