//! Wire types shared by the natter server and its clients.
//!
//! This crate provides:
//! - Binary envelope serialization and parsing ([`frame`])
//! - Identity type, reply texts and protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod types;

pub use frame::{Envelope, FileMeta, FrameError, Kind, Notice};
pub use types::{unix_now, UserId};
