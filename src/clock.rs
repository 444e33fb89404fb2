// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Row notifications for display.
//!
//! The clock has no timing of its own. The scheduler pushes the index of each
//! row it triggers into a lock-free queue, and this thread relays it to a
//! single listener so that highlighting always matches what is heard.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use tracing::{debug, error};

use crate::error::EngineError;

/// Default budget for joining the clock thread.
pub const DEFAULT_JOIN_BUDGET: Duration = Duration::from_millis(10);

/// How often the row queue is drained.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Receives the current row on every tick.
pub type RowListener = Arc<dyn Fn(usize) + Send + Sync>;

struct ClockState {
    enabled: AtomicBool,
    row: AtomicUsize,
    listener: Mutex<Option<RowListener>>,
}

/// Relays scheduler rows to a registered listener on its own thread.
pub struct UiClock {
    state: Arc<ClockState>,
    stop: Sender<()>,
    done: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
    join_budget: Duration,
}

impl UiClock {
    /// Starts the clock thread, draining rows from the given queue.
    pub fn start(
        mut rows: HeapCons<usize>,
        join_budget: Duration,
    ) -> Result<UiClock, EngineError> {
        let state = Arc::new(ClockState {
            enabled: AtomicBool::new(false),
            row: AtomicUsize::new(0),
            listener: Mutex::new(None),
        });
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread = {
            let state = state.clone();
            thread::Builder::new()
                .name("ui-clock".to_string())
                .spawn(move || {
                    loop {
                        while let Some(row) = rows.try_pop() {
                            state.tick(row);
                        }
                        match stop_rx.recv_timeout(POLL_INTERVAL) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => break,
                        }
                    }
                    debug!("UI clock stopped");
                    let _ = done_tx.send(());
                })?
        };

        Ok(UiClock {
            state,
            stop: stop_tx,
            done: done_rx,
            thread: Mutex::new(Some(thread)),
            join_budget,
        })
    }

    /// Registers the listener, replacing any previous one. The listener may
    /// itself replace or clear the registration.
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        *self.state.listener.lock() = Some(Arc::new(listener));
    }

    pub fn clear_listener(&self) {
        *self.state.listener.lock() = None;
    }

    /// Enabling resets the row to 0. Disabling takes effect immediately:
    /// rows arriving afterwards are dropped.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.state.row.store(0, Ordering::Relaxed);
        }
        self.state.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Acquire)
    }

    /// The last row relayed.
    pub fn row(&self) -> usize {
        self.state.row.load(Ordering::Relaxed)
    }

    /// Stops the clock thread within its join budget.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.set_enabled(false);
        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };

        let _ = self.stop.try_send(());
        match self.done.recv_timeout(self.join_budget) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("UI clock thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(budget = ?self.join_budget, "UI clock thread did not stop in time");
                Err(EngineError::ShutdownTimeout {
                    thread: "ui clock",
                    budget: self.join_budget,
                })
            }
        }
    }
}

impl ClockState {
    fn tick(&self, row: usize) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        self.row.store(row, Ordering::Relaxed);
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(row);
        }
    }
}

impl Drop for UiClock {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
