//! Client for the Sonitus noise monitor API.
//!
//! This crate fetches monitor listings and raw noise readings from the
//! upstream sensor service. The [`Upstream`] trait is the seam the relay
//! depends on; [`SonitusClient`] talks HTTP and [`MockUpstream`] serves
//! canned data in tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod traits;

pub use client::{Credentials, DEFAULT_BASE_URL, SonitusClient};
pub use error::{Result, UpstreamError};
pub use mock::{MockUpstream, MockUpstreamBuilder};
pub use traits::Upstream;
