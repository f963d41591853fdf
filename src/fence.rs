//! CPU/GPU ordering fences.

use log::warn;

use crate::driver::{gl, GlDriver};

/// Poll interval used by [`SyncFence::wait`].
const WAIT_TIMEOUT_NS: i32 = 1000;

/// A single outstanding GPU marker.
///
/// The fence does not own the driver; every operation borrows it, so the
/// fence can live next to the resource it guards. Call
/// [`release`](Self::release) before dropping a placed fence.
#[derive(Debug)]
pub struct SyncFence<F> {
    sync: Option<F>,
}

impl<F> Default for SyncFence<F> {
    fn default() -> Self {
        Self { sync: None }
    }
}

impl<F: Copy> SyncFence<F> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a marker is outstanding.
    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.sync.is_some()
    }

    /// Insert a new marker, deleting any previous one.
    pub fn place_fence<D: GlDriver<Fence = F>>(&mut self, driver: &mut D) {
        self.release(driver);
        match driver.fence_sync() {
            Ok(sync) => self.sync = Some(sync),
            Err(err) => warn!(target: "GLFence", "failed to place fence: {err}"),
        }
    }

    /// Non-blocking poll. A fence that was never placed counts as complete.
    pub fn is_completed<D: GlDriver<Fence = F>>(&self, driver: &mut D) -> bool {
        let Some(sync) = self.sync else {
            return true;
        };
        driver.client_wait_sync(sync, 0, 1) != gl::TIMEOUT_EXPIRED
    }

    /// Spin until the GPU reaches the marker.
    pub fn wait<D: GlDriver<Fence = F>>(&self, driver: &mut D) {
        let Some(sync) = self.sync else {
            return;
        };
        while driver.client_wait_sync(sync, 0, WAIT_TIMEOUT_NS) == gl::TIMEOUT_EXPIRED {}
    }

    /// Delete the marker, if any.
    pub fn release<D: GlDriver<Fence = F>>(&mut self, driver: &mut D) {
        if let Some(sync) = self.sync.take() {
            driver.delete_sync(sync);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HeadlessDriver;

    #[test]
    fn unplaced_fence_is_complete() {
        let mut driver = HeadlessDriver::new();
        let fence = SyncFence::new();
        assert!(fence.is_completed(&mut driver));
        fence.wait(&mut driver);
        assert_eq!(driver.counts().client_wait, 0);
    }

    #[test]
    fn wait_polls_until_signaled() {
        let mut driver = HeadlessDriver::new();
        driver.set_fence_latency(3);
        let mut fence = SyncFence::new();
        fence.place_fence(&mut driver);
        assert!(!fence.is_completed(&mut driver));
        fence.wait(&mut driver);
        assert!(fence.is_completed(&mut driver));
        fence.release(&mut driver);
        assert!(!fence.is_placed());
    }

    #[test]
    fn placing_replaces_the_previous_marker() {
        let mut driver = HeadlessDriver::new();
        let mut fence = SyncFence::new();
        fence.place_fence(&mut driver);
        fence.place_fence(&mut driver);
        assert_eq!(driver.counts().fence_sync, 2);
        fence.release(&mut driver);
    }
}
