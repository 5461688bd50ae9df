// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread management utilities for consistent lifecycle handling.

use crate::lock;
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

/// Status of a managed child thread.
#[derive(Debug, Default)]
pub enum ThreadState {
    /// Thread has not been started yet, or has already been joined
    #[default]
    Ready,
    /// Thread is running with the given handle
    Running(JoinHandle<()>),
}

impl ThreadState {
    pub fn is_running(&self) -> bool {
        matches!(self, ThreadState::Running(_))
    }
}

/// A named thread that is signalled and joined when the owner goes away.
///
/// The thread body receives the `dropped` flag and should return once it is
/// set, or once whatever it blocks on (typically a channel) is closed. The
/// ManagedThread is intentionally NOT Clone so Drop runs exactly once.
#[derive(Debug)]
pub struct ManagedThread {
    name: String,
    state: Mutex<ThreadState>,
    dropped: Arc<AtomicBool>,
}

impl ManagedThread {
    /// Spawn `body` on a new thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;

        Ok(ManagedThread {
            name: name.to_string(),
            state: Mutex::new(ThreadState::Running(handle)),
            dropped,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a clone of the dropped flag for checking shutdown state
    pub fn dropped_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }

    /// Check if the thread is currently running
    pub fn is_running(&self) -> bool {
        match &*lock!(self.state) {
            ThreadState::Running(handle) => !handle.is_finished(),
            ThreadState::Ready => false,
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::Relaxed);

        let mut state = lock!(self.state);
        if let ThreadState::Running(handle) =
            std::mem::take(&mut *state)
        {
            drop(state);
            // The last owner can be released from the managed thread itself,
            // joining there would never return.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
