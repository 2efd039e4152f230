//! asyncdomain
//!
//! Error domains for single-threaded asynchronous code.
//!
//! An [`EventLoop`] runs deferred callbacks and reports each operation's
//! lifecycle through [causality hooks](runtime::hooks). A [`Domain`]
//! subscribes to those hooks to learn which operations descend from work it
//! started, re-enters itself around their callbacks, and receives the
//! failures they raise once the [error router](domain::router) is installed.
//!
//! # Example
//!
//! ```no_run
//! use asyncdomain::domain::router;
//! use asyncdomain::{Domain, EventLoop, Result};
//!
//! fn main() -> Result<()> {
//!     router::install();
//!     let event_loop = EventLoop::new();
//!
//!     let domain = Domain::create();
//!     domain.on_error(|fault| println!("domain error {}", fault));
//!     domain.run(|| {
//!         event_loop.set_timeout(0, || anyhow::bail!("my error"));
//!     });
//!
//!     event_loop.run()?;
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod domain;
pub mod error;
pub mod process;
pub mod runtime;

// Sample driver
pub mod demo;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::Context;
pub use domain::{Domain, Emitter, Fault};
pub use error::{Error, Result};
pub use runtime::scheduler::EventLoop;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "asyncdomain";
