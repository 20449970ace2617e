#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]

//! bhole library: the building blocks of the reverse-tunnel relay.
//!
//! - `registry` maps endpoint names to live tunnels
//! - `tunnel` defines the [`Tunnel`] capability and the WebSocket agent
//!   transport behind it
//! - `proxy` forwards external HTTP requests through a tunnel
//! - `routing` picks the surface (status, control, proxy) per request
//! - `routes` serves the status API
//! - `config` and `auth` cover configuration and the agent shared secret

pub mod auth;
pub mod config;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod routing;
pub mod state;
pub mod tunnel;

pub use config::Config;
pub use registry::Registry;
pub use state::RelayState;
pub use tunnel::{Tunnel, TunnelError};
