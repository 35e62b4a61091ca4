//! Writer-preferring reader/writer lock
//!
//! Many readers or one writer, with writer preference: once a writer is
//! waiting, new readers queue behind it. Index rebuilds take the exclusive
//! side, and without preference a steady stream of searches could starve
//! them indefinitely.
//!
//! Both modes hand out guards; the lock is released only by guard drop, on
//! every exit path. There is no raw lock/unlock API to forget.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct LockState {
    readers: usize,
    writer_active: bool,
    writers_waiting: usize,
}

/// Writer-preferring reader/writer lock over `T`.
pub struct RwLock<T> {
    state: Mutex<LockState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the state machine guarantees exclusive access for `&mut T` (one
// active writer, zero readers) and shared access for `&T`, matching the
// requirements of Send/Sync for a lock.
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire shared access.
    ///
    /// Blocks while a writer is active or any writer is waiting.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock();
        while state.writer_active || state.writers_waiting > 0 {
            self.readers_cv.wait(&mut state);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire exclusive access.
    ///
    /// Registers as a waiting writer (blocking new readers), then blocks
    /// until all active readers and any active writer have left.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock();
        state.writers_waiting += 1;
        while state.readers > 0 || state.writer_active {
            self.writers_cv.wait(&mut state);
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        WriteGuard { lock: self }
    }
}

/// Shared guard; releases on drop.
pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: readers hold shared access while registered in the state.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.writers_cv.notify_one();
        }
    }
}

/// Exclusive guard; releases on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the holder is the only active writer and readers are zero.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer_active = false;
        if state.writers_waiting > 0 {
            self.lock.writers_cv.notify_one();
        } else {
            self.lock.readers_cv.notify_all();
        }
    }
}
