//! Engine-owned idempotency markers, kept apart from the caller's run value.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::config::DEFAULT_MAX_TRACKED_RUNS;
use crate::types::RunId;

/// Once-set flags for one run instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMarkers {
    /// The run's raw responses have been merged into its ledger.
    pub backfilled: bool,
    /// Where the run's trace dump was scheduled to be written.
    pub dump_path: Option<PathBuf>,
    /// A rollup entry for the run has been scheduled.
    pub rollup_appended: bool,
}

#[derive(Debug)]
struct Tracked {
    last_used: u64,
    markers: Arc<Mutex<RunMarkers>>,
}

#[derive(Debug)]
struct Inner {
    runs: HashMap<RunId, Tracked>,
    /// `last_used` tick -> run, oldest first.
    recency: BTreeMap<u64, RunId>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self, run_id: RunId) -> Arc<Mutex<RunMarkers>> {
        self.tick += 1;
        let tick = self.tick;
        let tracked = self.runs.entry(run_id).or_insert_with(|| Tracked {
            last_used: tick,
            markers: Arc::default(),
        });
        self.recency.remove(&tracked.last_used);
        tracked.last_used = tick;
        self.recency.insert(tick, run_id);
        Arc::clone(&tracked.markers)
    }

    fn evict_beyond(&mut self, capacity: usize) {
        while self.runs.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.runs.remove(&oldest);
            debug!(run_id = %oldest, "evicted run markers");
        }
    }

    fn remove(&mut self, run_id: RunId) -> Option<Arc<Mutex<RunMarkers>>> {
        let tracked = self.runs.remove(&run_id)?;
        self.recency.remove(&tracked.last_used);
        Some(tracked.markers)
    }
}

/// Side-table of [`RunMarkers`] keyed by run id, holding at most `capacity`
/// runs. The least recently summarized run is evicted first.
#[derive(Debug)]
pub struct RunStateTable {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for RunStateTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_TRACKED_RUNS)
    }
}

impl RunStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                runs: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run `f` against the markers for `run_id`, creating them on first use.
    ///
    /// Only the run's own markers stay locked while `f` runs: calls for the
    /// same run never interleave, calls for different runs do not wait on
    /// each other.
    pub fn with_markers<R>(&self, run_id: RunId, f: impl FnOnce(&mut RunMarkers) -> R) -> R {
        let markers = {
            let mut inner = self.lock();
            let markers = inner.touch(run_id);
            inner.evict_beyond(self.capacity);
            markers
        };
        let mut guard = markers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Snapshot of the markers for `run_id`, if the run is tracked.
    pub fn get(&self, run_id: RunId) -> Option<RunMarkers> {
        let markers = self.lock().runs.get(&run_id).map(|t| Arc::clone(&t.markers))?;
        let snapshot = markers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Some(snapshot)
    }

    /// Drop the markers for `run_id`.
    pub fn forget(&self, run_id: RunId) -> Option<RunMarkers> {
        let markers = self.lock().remove(run_id)?;
        let snapshot = markers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Some(snapshot)
    }

    pub fn len(&self) -> usize {
        self.lock().runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
