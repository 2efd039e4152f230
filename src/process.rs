//! Last-resort error handling.
//!
//! Failures that escape an operation callback are offered to the uncaught
//! handlers registered here, in registration order. The first handler that
//! accepts a fault stops the search; a fault nobody accepts is fatal and
//! stops the event loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use crate::domain::Fault;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(0);

/// Uncaught handler: `Ok` accepts the fault, `Err` hands it on.
pub type UncaughtHandler = Rc<dyn Fn(Fault) -> Result<(), Fault>>;

thread_local! {
    static HANDLERS: RefCell<Vec<(HandlerId, UncaughtHandler)>> = const { RefCell::new(Vec::new()) };
}

/// Handler registration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

/// Register an uncaught handler.
pub fn on_uncaught<F>(handler: F) -> HandlerId
where
    F: Fn(Fault) -> Result<(), Fault> + 'static,
{
    let id = HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst));
    HANDLERS.with(|handlers| handlers.borrow_mut().push((id, Rc::new(handler))));
    id
}

/// Unregister an uncaught handler. Returns whether it was registered.
pub fn remove_uncaught(id: HandlerId) -> bool {
    let removed = HANDLERS
        .try_with(|handlers| {
            let mut handlers = handlers.borrow_mut();
            handlers
                .iter()
                .position(|(handler_id, _)| *handler_id == id)
                .map(|index| handlers.remove(index))
        })
        .ok()
        .flatten();
    removed.is_some()
}

/// Number of registered uncaught handlers.
pub fn handler_count() -> usize {
    HANDLERS.with(|handlers| handlers.borrow().len())
}

/// Offer an escaped fault to the uncaught handlers.
///
/// Returns the fault back when no handler accepted it.
pub fn escape(fault: Fault) -> Result<(), Fault> {
    let handlers: Vec<UncaughtHandler> = HANDLERS.with(|handlers| {
        handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect()
    });

    let mut fault = fault;
    for handler in handlers {
        match handler(fault) {
            Ok(()) => return Ok(()),
            Err(unhandled) => fault = unhandled,
        }
    }

    error!("uncaught error: {}", fault);
    Err(fault)
}
