// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Cross-thread data availability signal

use crate::error::Error;
use evflow_log::error;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of data units accepted into the pipeline and not yet consumed.
///
/// Producers call [notify_increase](DataAvailability::notify_increase) before the consumer
/// can take the unit, for example while still holding the lock of the queue the unit was
/// pushed to. Consumers call [notify_decrease](DataAvailability::notify_decrease) once a unit
/// is fully consumed. A consumer taking a unit whose increase has not happened yet gets
/// [Error::Logic] from its decrease. A control thread may [query](DataAvailability::query) the
/// count at any time without taking a lock. The count is a hint for sleeping or housekeeping
/// decisions and never gates the scheduler.
#[derive(Debug, Default)]
pub struct DataAvailability {
    count: AtomicUsize,
}

impl DataAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce one new unit of data.
    ///
    /// Writes made before this call are visible to a thread observing the new count.
    pub fn notify_increase(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Announce that one unit of data has been consumed.
    ///
    /// The caller has synchronized with the producer when it took the data, so relaxed
    /// ordering suffices. A decrease without a matching increase leaves the count untouched
    /// and returns [Error::Logic].
    pub fn notify_decrease(&self) -> Result<(), Error> {
        self.count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                count.checked_sub(1)
            })
            .map(|_| ())
            .map_err(|_| {
                error!("Data availability decreased below zero");
                Error::Logic("data availability decrease without matching increase")
            })
    }

    /// Snapshot of the current count
    pub fn query(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}
