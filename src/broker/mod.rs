// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The low-memory broker (spec §4.7): solicits and accepts cooperative
//! memory offers from the seven handler kinds the core registers. The
//! broker itself is an external collaborator (spec §1); this module is the
//! core's side of that interface — the handlers it registers, and a minimal
//! in-process broker implementation usable by callers with no host broker
//! of their own.

mod handlers;
mod rsd_registry;

pub use handlers::{BlobBlockRecycleHandler, PfinModuleHandler, RsdPurgeHandler};
pub use rsd_registry::RsdStoreRegistry;

#[cfg(feature = "icc")]
pub use handlers::IccProfileHandler;

use std::sync::Arc;

use crate::metrics::{MEMORY_HANDLER_OFFERS_TOTAL, MEMORY_HANDLER_RELEASES_TOTAL};

/// A low-memory handler (spec §4.7): `solicit` probes how many bytes it
/// believes it could release without yet releasing them; `release`
/// performs the release a prior `solicit` promised. Implementations must be
/// reentrancy-safe per spec §4.7/§5: declining (returning `None`/`0`) rather
/// than blocking or recursing when their own cache's lock is already held.
pub trait LowMemoryHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probes eligibility for releasing up to `target_bytes` without
    /// purging anything. Returns `None` if the handler is already
    /// releasing (reentrant solicitation), contended, or has latched
    /// `offers_limited`.
    fn solicit(&self, target_bytes: u64) -> Option<u64>;

    /// Performs the release a prior `solicit` found eligible. Returns the
    /// number of bytes actually freed; `0` is not an error; it sets
    /// `offers_limited` per spec §4.7 propagation policy.
    fn release(&self, target_bytes: u64) -> u64;

    /// Clears any latched `offers_limited` state (spec §4.7: cleared "the
    /// next time the cache observes an increase in committed memory").
    fn notify_memory_increased(&self);
}

/// A minimal in-process broker (spec §1's external broker, provided here so
/// this crate is independently testable and usable without a host one).
/// Invokes handlers in registration order and stops once `target_bytes`
/// have been reclaimed (spec §4.7 Ordering guarantees: "may stop early when
/// enough memory has been reclaimed").
#[derive(Default)]
pub struct LowMemoryBroker {
    handlers: Vec<Arc<dyn LowMemoryHandler>>,
}

impl LowMemoryBroker {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn LowMemoryHandler>) {
        self.handlers.push(handler);
    }

    /// Solicits and releases offers until `target_bytes` total have been
    /// reclaimed or every handler has declined. Returns the bytes actually
    /// freed.
    pub fn request(&self, target_bytes: u64) -> u64 {
        let mut freed = 0u64;
        for handler in &self.handlers {
            if freed >= target_bytes {
                break;
            }
            let remaining = target_bytes - freed;
            let Some(offer) = handler.solicit(remaining) else {
                continue;
            };
            MEMORY_HANDLER_OFFERS_TOTAL.with_label_values(&[handler.name()]).inc();
            if offer == 0 {
                continue;
            }
            let released = handler.release(offer);
            if released > 0 {
                MEMORY_HANDLER_RELEASES_TOTAL.with_label_values(&[handler.name()]).inc();
                freed += released;
                log::debug!("low-memory broker: handler '{}' released {released} bytes", handler.name());
            }
        }
        freed
    }

    /// Broadcasts the "committed memory grew" signal that clears every
    /// handler's `offers_limited` latch (spec §4.7, §9 Open Question:
    /// "ensure the latch cannot permanently disable the handler").
    pub fn notify_memory_increased(&self) {
        for handler in &self.handlers {
            handler.notify_memory_increased();
        }
    }
}
