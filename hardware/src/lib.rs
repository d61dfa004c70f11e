//! Hardware drivers for the solar/lunar tracking bench.
//!
//! This crate talks to the Kipp & Zonen Solys2 two-axis positioner over its
//! line-oriented TCP command set and exposes the pieces the automation layer
//! builds on:
//!
//! - [`solys`] - wire codec, resilient [`Connection`](solys::Connection) and the
//!   [`Solys2`](solys::Solys2) device client
//! - [`cancel`] - a cancellation token for interruptible waits
//! - [`Positioner`] - the narrow interface automation workers drive
//!
//! # Concurrency
//!
//! The device is half-duplex and keeps per-session state (authentication,
//! pending replies). A [`Solys2`](solys::Solys2) must only be used by one
//! caller at a time. [`SharedPositioner`] wraps it in a mutex so a worker can
//! hold it, but running two workers against the same device concurrently is
//! unsupported.

pub mod cancel;
mod positioner;
pub mod solys;

pub use positioner::{Positioner, SharedPositioner};
