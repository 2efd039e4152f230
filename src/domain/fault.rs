//! Error values delivered through domains.
//!
//! A [`Fault`] is a shareable error plus provenance annotations recording
//! where it was routed and how it got there.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::emitter::EmitterId;
use super::DomainId;
use crate::error::Error;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a callback wrapped by [`Domain::intercept`](super::Domain::intercept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId {
    seq: u64,
    name: &'static str,
}

impl CallbackId {
    pub(crate) fn of<F>() -> Self {
        Self {
            seq: NEXT_CALLBACK_ID.fetch_add(1, Ordering::SeqCst),
            name: std::any::type_name::<F>(),
        }
    }

    /// Sequence number, unique per wrapper.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Type name of the wrapped callback.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for CallbackId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Callback({})", self.seq)
    }
}

/// Provenance attached to a fault as it is routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    /// Domain the fault was delivered to.
    pub domain: Option<DomainId>,
    /// `Some(true)` when the fault escaped and was caught by the router,
    /// `Some(false)` when it was delivered by interception or a member emitter.
    pub domain_thrown: Option<bool>,
    /// The intercepted callback the error was destined for.
    pub domain_bound: Option<CallbackId>,
    /// The member emitter that raised the error.
    pub domain_emitter: Option<EmitterId>,
}

/// A shareable, annotated error.
#[derive(Clone)]
pub struct Fault {
    error: Arc<anyhow::Error>,
    annotations: Annotations,
}

impl Fault {
    /// Wrap an error with empty annotations.
    pub fn new(error: anyhow::Error) -> Self {
        Self {
            error: Arc::new(error),
            annotations: Annotations::default(),
        }
    }

    /// Build a fault from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(anyhow::Error::msg(message))
    }

    /// Recover a fault from an error that may already carry one.
    ///
    /// A fault that travelled through `?` as [`Error::UnhandledError`] or
    /// [`Error::Uncaught`] comes back out unchanged, annotations included.
    pub fn from_error(error: anyhow::Error) -> Self {
        match error.downcast::<Error>() {
            Ok(Error::UnhandledError(fault)) | Ok(Error::Uncaught(fault)) => fault,
            Ok(other) => Self::new(other.into()),
            Err(error) => Self::new(error),
        }
    }

    /// The underlying error.
    #[inline]
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Provenance annotations.
    #[inline]
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Domain the fault was delivered to.
    #[inline]
    pub fn domain(&self) -> Option<DomainId> {
        self.annotations.domain
    }

    /// Whether the fault was caught by the router after escaping.
    #[inline]
    pub fn is_thrown(&self) -> bool {
        self.annotations.domain_thrown == Some(true)
    }

    /// Whether two faults share the same underlying error.
    pub fn same_error(
        &self,
        other: &Fault,
    ) -> bool {
        Arc::ptr_eq(&self.error, &other.error)
    }

    pub(crate) fn annotate(
        mut self,
        f: impl FnOnce(&mut Annotations),
    ) -> Self {
        f(&mut self.annotations);
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Display::fmt(&*self.error, f)
    }
}

impl fmt::Debug for Fault {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Fault")
            .field("error", &format_args!("{}", self.error))
            .field("annotations", &self.annotations)
            .finish()
    }
}

impl From<anyhow::Error> for Fault {
    fn from(error: anyhow::Error) -> Self {
        Self::from_error(error)
    }
}
