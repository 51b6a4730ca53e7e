//! Map client for hydrological perceptual models.
//!
//! The library holds the filtering and rendering state machine
//! ([`store::MapStore`]) and the pieces it is built from; the binary wraps it
//! in a terminal front end.

pub mod analytics;
pub mod api;
pub mod assets;
pub mod auth;
pub mod config;
pub mod error;
pub mod filter;
pub mod map_draw;
pub mod model;
pub mod notify;
pub mod popup;
pub mod state;
pub mod store;
pub mod ui;
pub mod view;

pub use error::{MapError, Result};
