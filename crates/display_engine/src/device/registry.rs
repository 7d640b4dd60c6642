//! Resource registry
//!
//! Consumers of the graphics device (renderers, video surfaces, overlays)
//! register here to be told when the device goes away and when it is usable
//! again. The registry only holds weak references: it never keeps a consumer
//! alive, and a consumer that is dropped without unregistering is skipped and
//! pruned.
//!
//! # Locking
//! One lock serializes registration and announcements. Announcements keep the
//! lock for the whole fan-out, so a resource registered or unregistered from
//! another thread waits until every callback has returned. The lock is
//! re-entrant: a callback may register or unregister resources on the
//! announcing thread.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

/// A consumer of the graphics device
///
/// Callbacks run synchronously on the announcing thread and should return
/// quickly. Between `on_lost_device` and `on_reset_device` the resource must
/// not use GPU objects tied to the old device.
pub trait DisplayResource: Send + Sync {
    /// The device is going away; release device-bound objects
    fn on_lost_device(&self);

    /// The device is usable again; recreate device-bound objects
    fn on_reset_device(&self);
}

#[derive(Default)]
struct RegistryState {
    resources: Vec<Weak<dyn DisplayResource>>,
    device_lost: bool,
}

impl RegistryState {
    fn position(&self, ptr: *const ()) -> Option<usize> {
        self.resources
            .iter()
            .position(|entry| Weak::as_ptr(entry).cast::<()>() == ptr)
    }
}

/// Thread-safe set of [`DisplayResource`]s in registration order
#[derive(Default)]
pub struct ResourceRegistry {
    state: ReentrantMutex<RefCell<RegistryState>>,
}

fn data_ptr<R: DisplayResource + ?Sized>(resource: &Arc<R>) -> *const () {
    Arc::as_ptr(resource).cast::<()>()
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; registering it again is a no-op
    pub fn register<R: DisplayResource + 'static>(&self, resource: &Arc<R>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        state.resources.retain(|entry| entry.strong_count() > 0);
        if state.position(data_ptr(resource)).is_some() {
            log::debug!("Display resource already registered");
            return;
        }

        let weak = Arc::downgrade(resource);
        let weak: Weak<dyn DisplayResource> = weak;
        state.resources.push(weak);
        log::debug!("Display resource registered ({} total)", state.resources.len());
    }

    /// Remove a resource; unregistering an absent resource is a no-op
    pub fn unregister<R: DisplayResource + ?Sized>(&self, resource: &Arc<R>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        if let Some(index) = state.position(data_ptr(resource)) {
            state.resources.remove(index);
            log::debug!("Display resource unregistered ({} left)", state.resources.len());
        }
    }

    /// Whether `resource` is registered
    pub fn contains<R: DisplayResource + ?Sized>(&self, resource: &Arc<R>) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.position(data_ptr(resource)).is_some()
    }

    /// Number of live registered resources
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.resources.iter().filter(|entry| entry.strong_count() > 0).count()
    }

    /// Whether no live resource is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a lost announcement is waiting for its reset
    pub fn is_device_lost(&self) -> bool {
        let guard = self.state.lock();
        let lost = guard.borrow().device_lost;
        lost
    }

    /// Tell every resource the device is lost
    ///
    /// Returns how many resources were notified.
    pub fn announce_lost_device(&self) -> usize {
        let guard = self.state.lock();
        let snapshot = {
            let mut state = guard.borrow_mut();
            state.device_lost = true;
            state.resources.clone()
        };

        let notified = Self::fan_out(&guard, &snapshot, |resource| resource.on_lost_device());
        log::info!("Announced lost device to {notified} resource(s)");
        notified
    }

    /// Tell every resource the device is back
    ///
    /// Does nothing unless a lost announcement is outstanding, so a reset is
    /// never seen without the lost that opened its cycle. Returns how many
    /// resources were notified.
    pub fn announce_reset_device(&self) -> usize {
        let guard = self.state.lock();
        let snapshot = {
            let mut state = guard.borrow_mut();
            if !state.device_lost {
                log::warn!("Reset device announced without a preceding lost device, ignoring");
                return 0;
            }
            state.device_lost = false;
            state.resources.clone()
        };

        let notified = Self::fan_out(&guard, &snapshot, |resource| resource.on_reset_device());
        log::info!("Announced reset device to {notified} resource(s)");
        notified
    }

    /// Invoke `notify` on each snapshot entry that is still registered and alive
    ///
    /// The `RefCell` borrow is released around every callback so resources can
    /// re-enter the registry.
    fn fan_out(
        state: &RefCell<RegistryState>,
        snapshot: &[Weak<dyn DisplayResource>],
        notify: impl Fn(&dyn DisplayResource),
    ) -> usize {
        let mut notified = 0;
        for entry in snapshot {
            let still_registered = state
                .borrow()
                .position(Weak::as_ptr(entry).cast::<()>())
                .is_some();
            if !still_registered {
                continue;
            }

            match entry.upgrade() {
                Some(resource) => {
                    notify(resource.as_ref());
                    notified += 1;
                }
                None => log::debug!("Skipping dropped display resource"),
            }
        }
        notified
    }
}
