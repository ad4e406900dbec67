//! Requester / main loop.
pub mod main_loop;

pub use main_loop::{Collaborators, Requester, RequestOutcome, TickReport};
