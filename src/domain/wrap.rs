//! Callback wrappers produced by [`Domain::bind`] and [`Domain::intercept`].

use tracing::debug;

use super::fault::{CallbackId, Fault};
use super::Domain;
use crate::error::Result;

/// A callback that always runs inside its domain.
///
/// Transparent: arguments go in unchanged, the result (including any error
/// value) comes back unchanged.
pub struct Bound<F> {
    domain: Domain,
    callback: F,
}

impl<F> Bound<F> {
    pub(crate) fn new(
        domain: Domain,
        callback: F,
    ) -> Self {
        Self { domain, callback }
    }

    /// The domain this callback is bound to.
    #[inline]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Invoke with `args`.
    pub fn call<A, R>(
        &self,
        args: A,
    ) -> R
    where
        F: Fn(A) -> R,
    {
        let _scope = self.domain.scope();
        (self.callback)(args)
    }

    /// Invoke a stateful callback with `args`.
    pub fn call_mut<A, R>(
        &mut self,
        args: A,
    ) -> R
    where
        F: FnMut(A) -> R,
    {
        let _scope = self.domain.scope();
        (self.callback)(args)
    }
}

impl<F> std::fmt::Debug for Bound<F> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Bound")
            .field("domain", &self.domain.id())
            .field("callback", &std::any::type_name::<F>())
            .finish()
    }
}

/// An error-first callback whose errors go to its domain.
///
/// `Err` outcomes are annotated and emitted on the domain, and the callback
/// is skipped. `Ok` values are passed to the callback inside the domain.
pub struct Intercepted<F> {
    domain: Domain,
    id: CallbackId,
    callback: F,
}

impl<F> Intercepted<F> {
    pub(crate) fn new(
        domain: Domain,
        callback: F,
    ) -> Self {
        Self {
            domain,
            id: CallbackId::of::<F>(),
            callback,
        }
    }

    /// The domain errors are delivered to.
    #[inline]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Identity recorded in `domain_bound` annotations.
    #[inline]
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Deliver `outcome`.
    ///
    /// Returns `Ok(None)` when the outcome was an error routed to the domain,
    /// and `Err` only when the domain had nowhere to deliver it.
    pub fn call<T, R>(
        &self,
        outcome: anyhow::Result<T>,
    ) -> Result<Option<R>>
    where
        F: Fn(T) -> R,
    {
        match outcome {
            Ok(value) => {
                let _scope = self.domain.scope();
                Ok(Some((self.callback)(value)))
            }
            Err(error) => self.divert(error).map(|()| None),
        }
    }

    /// Deliver `outcome` to a stateful callback.
    pub fn call_mut<T, R>(
        &mut self,
        outcome: anyhow::Result<T>,
    ) -> Result<Option<R>>
    where
        F: FnMut(T) -> R,
    {
        match outcome {
            Ok(value) => {
                let _scope = self.domain.scope();
                Ok(Some((self.callback)(value)))
            }
            Err(error) => self.divert(error).map(|()| None),
        }
    }

    fn divert(
        &self,
        error: anyhow::Error,
    ) -> Result<()> {
        let domain = self.domain.id();
        let callback = self.id;
        debug!("{} intercepted error for {}: {}", domain, callback, error);
        let fault = Fault::from_error(error).annotate(|a| {
            a.domain = Some(domain);
            a.domain_bound = Some(callback);
            a.domain_thrown = Some(false);
        });
        self.domain.emit_error(fault)
    }
}

impl<F> std::fmt::Debug for Intercepted<F> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Intercepted")
            .field("domain", &self.domain.id())
            .field("id", &self.id)
            .finish()
    }
}
