//! Global error router.
//!
//! Installs one last-resort handler per thread. An escaped fault goes to the
//! current domain if there is one; otherwise, or when that domain cannot
//! deliver it, it is handed back to the fatal path.

use std::cell::Cell;

use tracing::debug;

use super::fault::Fault;
use super::slot;
use crate::error::Error;
use crate::process::{self, HandlerId};

thread_local! {
    static INSTALLED: Cell<Option<HandlerId>> = const { Cell::new(None) };
}

/// Install the router. Returns `false` if it was already installed.
pub fn install() -> bool {
    if is_installed() {
        return false;
    }
    let id = process::on_uncaught(route);
    INSTALLED.with(|installed| installed.set(Some(id)));
    debug!("error router installed as {}", id);
    true
}

/// Remove the router. Returns `false` if it was not installed.
pub fn uninstall() -> bool {
    match INSTALLED.with(Cell::take) {
        Some(id) => {
            process::remove_uncaught(id);
            debug!("error router uninstalled");
            true
        }
        None => false,
    }
}

/// Whether the router is installed on this thread.
pub fn is_installed() -> bool {
    INSTALLED.with(|installed| installed.get().is_some())
}

/// Route one escaped fault.
fn route(fault: Fault) -> Result<(), Fault> {
    let Some(domain) = slot::current() else {
        return Err(fault);
    };

    let id = domain.id();
    debug!("routing escaped error to {}: {}", id, fault);
    // A fault an intercepted callback could not deliver keeps `thrown = false`.
    let fault = fault.annotate(|a| {
        a.domain = Some(id);
        a.domain_thrown.get_or_insert(true);
    });

    match domain.emit_error(fault) {
        Ok(()) => Ok(()),
        Err(Error::UnhandledError(fault)) => Err(fault),
        Err(other) => Err(Fault::new(other.into())),
    }
}
