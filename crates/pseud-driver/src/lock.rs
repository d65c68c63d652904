//! Per-device mutual exclusion with blocking, non-blocking and interruptible acquisition.
//!
//! [`DeviceLock`] is a plain "held" flag protected by a `std::sync::Mutex` plus a `Condvar` that
//! waiters sleep on. Keeping the flag separate from the data it guards lets a waiter give up
//! (when its [`AbortSignal`] is raised) without ever having touched the device state.
//!
//! Wakeup protocol for interruption:
//! 1) A waiter registers its lock with the signal, then checks `raised` while holding the lock's
//!    state mutex before every sleep.
//! 2) [`AbortSignal::raise`] stores `raised` first, then takes the state mutex of every registered
//!    lock before notifying, so the notification cannot slip in between the waiter's check and
//!    its sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::{DeviceError, DeviceResult};

/// How a caller is willing to wait for a device lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acquire {
    /// Sleep until the lock is free; fail with [`DeviceError::Interrupted`] if the caller's
    /// abort signal is raised first.
    #[default]
    Blocking,
    /// Fail with [`DeviceError::WouldBlock`] instead of waiting.
    NonBlocking,
}

impl Acquire {
    /// Maps an `O_NONBLOCK`-style flag to an acquisition mode.
    pub fn from_nonblocking(nonblocking: bool) -> Self {
        if nonblocking {
            Acquire::NonBlocking
        } else {
            Acquire::Blocking
        }
    }
}

struct LockCore {
    held: Mutex<bool>,
    released: Condvar,
}

impl LockCore {
    fn state(&self) -> MutexGuard<'_, bool> {
        // The flag is a single bool that is never left half-updated, so a poisoned mutex still
        // holds a consistent value.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct DeviceLock {
    core: Arc<LockCore>,
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLock {
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore {
                held: Mutex::new(false),
                released: Condvar::new(),
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        *self.core.state()
    }

    /// Takes the lock without ever sleeping.
    pub fn try_lock(&self) -> DeviceResult<DeviceLockGuard<'_>> {
        let mut held = self.core.state();
        if *held {
            return Err(DeviceError::WouldBlock);
        }
        *held = true;
        Ok(DeviceLockGuard { lock: self })
    }

    /// Sleeps until the lock is free. Cannot be interrupted.
    pub fn lock(&self) -> DeviceLockGuard<'_> {
        let mut held = self.core.state();
        while *held {
            held = self
                .core
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        DeviceLockGuard { lock: self }
    }

    /// Sleeps until the lock is free or `signal` is raised.
    ///
    /// A free lock is taken even if the signal is already raised; the signal is only consulted
    /// once the caller would have to sleep.
    pub fn lock_interruptible(&self, signal: &AbortSignal) -> DeviceResult<DeviceLockGuard<'_>> {
        let _registration = signal.register(&self.core);
        let mut held = self.core.state();
        loop {
            if !*held {
                *held = true;
                return Ok(DeviceLockGuard { lock: self });
            }
            if signal.is_raised() {
                return Err(DeviceError::Interrupted);
            }
            held = self
                .core
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn acquire(&self, mode: Acquire, signal: &AbortSignal) -> DeviceResult<DeviceLockGuard<'_>> {
        match mode {
            Acquire::Blocking => self.lock_interruptible(signal),
            Acquire::NonBlocking => self.try_lock(),
        }
    }

    fn unlock(&self) {
        *self.core.state() = false;
        // Interrupted waiters leave without taking the lock, so wake everyone rather than
        // risk handing the only notification to one of them.
        self.core.released.notify_all();
    }
}

/// Releases the [`DeviceLock`] on drop.
#[must_use = "the device lock is released as soon as the guard is dropped"]
pub struct DeviceLockGuard<'a> {
    lock: &'a DeviceLock,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[derive(Default)]
struct SignalInner {
    raised: AtomicBool,
    waiting_on: Mutex<Vec<Arc<LockCore>>>,
}

/// Cancellation flag for blocking lock acquisition.
///
/// Clones share the same flag, so one thread can hand a clone to another and raise it to abort
/// a pending acquisition. The flag stays raised until [`AbortSignal::clear`] is called.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    /// Raises the signal and wakes every acquisition currently waiting on its behalf.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        let waiting = self.waiters().clone();
        for core in waiting {
            let _state = core.state();
            core.released.notify_all();
        }
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<Arc<LockCore>>> {
        self.inner
            .waiting_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, core: &Arc<LockCore>) -> Registration<'_> {
        self.waiters().push(core.clone());
        Registration {
            signal: self,
            core: core.clone(),
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("raised", &self.is_raised())
            .finish()
    }
}

struct Registration<'a> {
    signal: &'a AbortSignal,
    core: Arc<LockCore>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut waiters = self.signal.waiters();
        if let Some(pos) = waiters.iter().position(|c| Arc::ptr_eq(c, &self.core)) {
            waiters.swap_remove(pos);
        }
    }
}
