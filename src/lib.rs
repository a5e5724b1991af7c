//! hostpatch: runtime remediation for a dedicated game-server host.
//!
//! Fixes two host defects from inside the process:
//! - the server never enters its idle-save pause when it boots with nobody
//!   connected ([`pause`]);
//! - replacing a terrain mesh never destroys the old one ([`remediation`]).
//!
//! At load time the [`coordinator`] consults the [`gate`], resolves each
//! host member through the [`resolver`] and installs hooks that wrap the
//! host's own operations. Anything that fails to resolve leaves its
//! feature inert for the session; nothing here is fatal to the host.
//!
//! See `DESIGN.md` for the full architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod gate;
pub mod host;
pub mod resolver;

pub mod coordinator;
pub mod pause;
pub mod remediation;
pub mod spawn;

pub mod commands;
pub mod runtime;

pub mod sim;
