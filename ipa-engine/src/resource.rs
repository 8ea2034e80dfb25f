//! Power resource gate for the send path.
//!
//! The accelerator's power domain is managed elsewhere; the engine only
//! consumes a request/release contract. A grant may be deferred, in which
//! case the caller gets [`ResourceGrant::Pending`] now and should call back
//! later; the engine surfaces that as [`crate::EngineError::Retry`] without
//! queueing anything.

/// Outcome of a resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceGrant {
    /// The domain is powered; proceed.
    Granted,
    /// Power-up is in progress; call back later.
    Pending,
}

pub trait PowerResource {
    fn request(&mut self) -> ResourceGrant;
    fn release(&mut self);
}

/// A domain that is always powered, for bring-up and tests.
#[derive(Debug, Default)]
pub struct AlwaysOn;

impl PowerResource for AlwaysOn {
    fn request(&mut self) -> ResourceGrant {
        ResourceGrant::Granted
    }

    fn release(&mut self) {}
}
