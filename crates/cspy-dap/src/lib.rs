//! Debug Adapter Protocol server for multi-core C-SPY debug sessions.
//!
//! The adapter speaks DAP over stdio and drives a remote C-SPY session service
//! through the contract in `cspy-rpc`:
//! - [`session`] owns the session lifecycle and serves requests.
//! - [`run_control`] tracks why each core is expected to stop and reconciles
//!   backend stop notifications.
//! - [`breakpoints`] negotiates breakpoint types/modes per driver and installs
//!   source breakpoints.

pub mod breakpoints;
pub mod command_registry;
pub mod dap;
pub mod error;
pub mod event_listener;
pub mod hardening;
pub mod launch;
pub mod multicore;
pub mod outbound;
pub mod run_control;
pub mod server;
pub mod session;

pub use crate::error::{SessionError, SessionResult};
pub use crate::server::{run, run_stdio, ServerOptions};
