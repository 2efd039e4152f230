//! Runtime system
//!
//! This module contains the event loop, the causality hooks it reports
//! through, and the registry of live operations the domains build from them.

pub mod hooks;
pub mod registry;
pub mod scheduler;
