//! Morsel-driven parallel scheduler.
//!
//! A fixed pool of workers, each owning one [`Kernel`], is started once and
//! parked on a condition variable. [`MorselScheduler::spawn`] publishes a row
//! range; workers claim fixed-size morsels from a shared atomic cursor until
//! the range is exhausted, then merge their shard into the shared
//! [`GlobalTable`]. [`MorselScheduler::wait`] returns once every morsel is
//! processed and every worker has merged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use qone_metrics::{record_morsel, MERGES_TOTAL, PATH_KERNEL, PATH_PUSHDOWN, QUERIES_TOTAL, QUERY_LATENCY_SECS};
use qone_storage::Lineitem;

use crate::aggr::GlobalTable;
use crate::error::{ExecError, Result};
use crate::kernel::{Kernel, KernelConfig, KernelStats};
use crate::primitives::{GroupDomain, MAX_GROUPS};
use crate::profile::KernelProfile;
use crate::pushdown::{PushdownFilter, WORD_ROWS};
use crate::result::QueryResult;

/// Default rows per morsel.
pub const DEFAULT_MORSEL_SIZE: usize = 16 * 1024;

/// Worker pool sizing and morsel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Explicit worker count. `None` derives it from the machine.
    pub threads: Option<usize>,
    /// Rows claimed per cursor step.
    pub morsel_size: usize,
    /// Use every physical core rather than half of them.
    pub full_system: bool,
    /// Leave one core for the submitting thread.
    pub reserve_core: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { threads: None, morsel_size: DEFAULT_MORSEL_SIZE, full_system: true, reserve_core: false }
    }
}

impl SchedulerConfig {
    /// Reject empty pools and morsels that would split a bitmap word.
    pub fn validate(&self) -> Result<()> {
        if self.morsel_size == 0 || self.morsel_size % WORD_ROWS != 0 {
            return Err(ExecError::MorselSize(self.morsel_size));
        }
        if self.threads == Some(0) {
            return Err(ExecError::NoWorkers);
        }
        Ok(())
    }

    /// Worker count this configuration resolves to on this machine.
    pub fn worker_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| default_worker_count(num_cpus::get(), self.full_system, self.reserve_core))
    }
}

/// Derived pool size for `hardware` logical CPUs: half of them (hyper-threads
/// excluded), halved again unless `full_system`, minus one if `reserve_core`,
/// never below one.
pub fn default_worker_count(hardware: usize, full_system: bool, reserve_core: bool) -> usize {
    let mut n = hardware / 2;
    if !full_system {
        n /= 2;
    }
    if reserve_core {
        n = n.saturating_sub(1);
    }
    n.max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Workers still starting.
    Unclear,
    /// Idle.
    Done,
    Query,
    Destroy,
}

#[derive(Debug, Clone, Copy, Default)]
struct QuerySpec {
    end: usize,
    morsels: usize,
    pushdown_boundary: usize,
}

#[derive(Debug)]
struct Shared {
    stage: Stage,
    epoch: u64,
    query: QuerySpec,
    started: Option<Instant>,
    ready: usize,
    merged: usize,
    stats: KernelStats,
    profile: KernelProfile,
}

/// State every worker references; owned by the scheduler.
#[derive(Debug)]
struct Coordination {
    state: Mutex<Shared>,
    cond_start: Condvar,
    cond_finished: Condvar,
    morsel_start: AtomicUsize,
    morsel_completed: AtomicUsize,
}

impl Coordination {
    fn new() -> Self {
        Self {
            state: Mutex::new(Shared {
                stage: Stage::Unclear,
                epoch: 0,
                query: QuerySpec::default(),
                started: None,
                ready: 0,
                merged: 0,
                stats: KernelStats::default(),
                profile: KernelProfile::default(),
            }),
            cond_start: Condvar::new(),
            cond_finished: Condvar::new(),
            morsel_start: AtomicUsize::new(0),
            morsel_completed: AtomicUsize::new(0),
        }
    }

    fn destroy(&self) {
        self.state.lock().stage = Stage::Destroy;
        self.cond_start.notify_all();
    }
}

/// What a query participant needs besides its kernel.
#[derive(Debug, Clone)]
struct Participant {
    coord: Arc<Coordination>,
    table: Arc<Lineitem>,
    global: Arc<GlobalTable>,
    pushdown: Arc<PushdownFilter>,
    morsel_size: usize,
}

impl Participant {
    fn run_query(&self, kernel: &mut Kernel, query: QuerySpec) -> usize {
        kernel.reset();
        let mut morsels = 0;
        loop {
            let offset = self.coord.morsel_start.fetch_add(self.morsel_size, Ordering::Relaxed);
            if offset >= query.end {
                break;
            }
            let num = self.morsel_size.min(query.end - offset);
            self.process(kernel, offset, num, query.pushdown_boundary);
            morsels += 1;

            let completed = self.coord.morsel_completed.fetch_add(1, Ordering::AcqRel) + 1;
            if completed == query.morsels {
                let _guard = self.coord.state.lock();
                self.coord.cond_finished.notify_all();
            }
        }

        kernel.merge_into(&self.global);
        MERGES_TOTAL.inc();
        let stats = kernel.take_stats();
        let profile = kernel.take_profile();

        let mut state = self.coord.state.lock();
        state.merged += 1;
        state.stats.absorb(&stats);
        state.profile.absorb(&profile);
        self.coord.cond_finished.notify_all();
        morsels
    }

    fn process(&self, kernel: &mut Kernel, offset: usize, num: usize, boundary: usize) {
        let end = offset + num;
        let split = boundary.clamp(offset, end);
        if split > offset {
            self.pushdown.precompute(&self.table, offset, split - offset);
            record_morsel(PATH_PUSHDOWN, split - offset);
        }
        if split < end {
            kernel.task(split, end - split);
            record_morsel(PATH_KERNEL, end - split);
        }
    }
}

fn worker(id: usize, participant: Participant, config: KernelConfig, domain: GroupDomain) {
    let mut kernel = Kernel::build(Arc::clone(&participant.table), config, domain);
    let coord = Arc::clone(&participant.coord);
    {
        let mut state = coord.state.lock();
        state.ready += 1;
        coord.cond_finished.notify_all();
    }

    let mut seen = 0;
    loop {
        let query = {
            let mut state = coord.state.lock();
            while state.stage != Stage::Destroy && !(state.stage == Stage::Query && state.epoch != seen) {
                coord.cond_start.wait(&mut state);
            }
            if state.stage == Stage::Destroy {
                break;
            }
            seen = state.epoch;
            state.query
        };
        let morsels = participant.run_query(&mut kernel, query);
        debug!(worker = id, morsels, "shard merged");
    }
    debug!(worker = id, "worker exiting");
}

/// Fixed worker pool evaluating Q1 over one table.
#[derive(Debug)]
pub struct MorselScheduler {
    participant: Participant,
    kernel_config: KernelConfig,
    domain: GroupDomain,
    workers: Vec<JoinHandle<()>>,
    caller: Option<Kernel>,
}

impl MorselScheduler {
    /// Start the pool and block until every worker has built its kernel.
    pub fn new(table: Arc<Lineitem>, kernel_config: KernelConfig, config: SchedulerConfig) -> Result<Self> {
        kernel_config.validate()?;
        config.validate()?;
        let domain = GroupDomain::from_table(&table)?;
        let num_workers = config.worker_count();

        let participant = Participant {
            coord: Arc::new(Coordination::new()),
            pushdown: Arc::new(PushdownFilter::new(table.cardinality(), kernel_config.shipdate_threshold)),
            global: Arc::new(GlobalTable::new(MAX_GROUPS)),
            morsel_size: config.morsel_size,
            table,
        };

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let p = participant.clone();
            let spawned =
                thread::Builder::new().name(format!("qone-worker-{id}")).spawn(move || worker(id, p, kernel_config, domain));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    warn!(error = %e, spawned = workers.len(), "worker spawn failed, tearing down pool");
                    participant.coord.destroy();
                    for w in workers {
                        let _ = w.join();
                    }
                    return Err(e.into());
                }
            }
        }

        {
            let coord = &participant.coord;
            let mut state = coord.state.lock();
            while state.ready < num_workers {
                coord.cond_finished.wait(&mut state);
            }
            state.stage = Stage::Done;
        }
        info!(
            workers = num_workers,
            morsel_size = config.morsel_size,
            rows = participant.table.cardinality(),
            "scheduler ready"
        );
        Ok(Self { participant, kernel_config, domain, workers, caller: None })
    }

    /// Number of pool threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// The table being queried.
    pub fn table(&self) -> &Arc<Lineitem> {
        &self.participant.table
    }

    /// The group domain shared by every kernel.
    pub fn domain(&self) -> &GroupDomain {
        &self.domain
    }

    /// The shared result table.
    pub fn global(&self) -> &GlobalTable {
        &self.participant.global
    }

    /// The push-down bitmap and its queue of finished ranges.
    pub fn pushdown(&self) -> &PushdownFilter {
        &self.participant.pushdown
    }

    /// Start a query over rows `offset..offset + num`. Rows below
    /// `pushdown_boundary` only have their predicate bitmap computed; pass 0
    /// to run every row through the kernel.
    pub fn spawn(&self, offset: usize, num: usize, pushdown_boundary: usize) -> Result<()> {
        let cardinality = self.participant.table.cardinality();
        let end = offset
            .checked_add(num)
            .filter(|&end| end <= cardinality)
            .ok_or(ExecError::RangeOutOfBounds { offset, end: offset.saturating_add(num), cardinality })?;
        if pushdown_boundary > offset {
            if offset % WORD_ROWS != 0 {
                return Err(ExecError::PushdownAlignment(offset));
            }
            if pushdown_boundary < end && pushdown_boundary % WORD_ROWS != 0 {
                return Err(ExecError::PushdownAlignment(pushdown_boundary));
            }
        }

        let coord = &self.participant.coord;
        let mut state = coord.state.lock();
        if state.stage == Stage::Query {
            return Err(ExecError::QueryInFlight);
        }
        let morsels = num.div_ceil(self.participant.morsel_size);
        state.query = QuerySpec { end, morsels, pushdown_boundary };
        coord.morsel_start.store(offset, Ordering::Relaxed);
        coord.morsel_completed.store(0, Ordering::Relaxed);
        state.merged = 0;
        state.epoch += 1;
        state.started = Some(Instant::now());
        state.stage = Stage::Query;
        coord.cond_start.notify_all();
        info!(offset, num, pushdown_boundary, morsels, epoch = state.epoch, "query spawned");
        Ok(())
    }

    /// Block until the current query is complete. With `active`, the calling
    /// thread claims morsels too, using its own kernel. Returns at once when
    /// nothing is in flight.
    pub fn wait(&mut self, active: bool) {
        let query = {
            let state = self.participant.coord.state.lock();
            if state.stage != Stage::Query {
                return;
            }
            state.query
        };
        if active {
            let Self { participant, kernel_config, domain, caller, .. } = self;
            let kernel = caller
                .get_or_insert_with(|| Kernel::build(Arc::clone(&participant.table), *kernel_config, *domain));
            participant.run_query(kernel, query);
        }

        let coord = &self.participant.coord;
        let merges = self.workers.len() + active as usize;
        let mut state = coord.state.lock();
        while coord.morsel_completed.load(Ordering::Acquire) < query.morsels || state.merged < merges {
            coord.cond_finished.wait(&mut state);
        }
        state.stage = Stage::Done;
        QUERIES_TOTAL.inc();
        if let Some(started) = state.started.take() {
            let elapsed = started.elapsed();
            QUERY_LATENCY_SECS.observe(elapsed.as_secs_f64());
            info!(elapsed_ms = elapsed.as_secs_f64() * 1e3, morsels = query.morsels, "query complete");
        }
    }

    /// Run rows `offset..offset + num` to completion without push-down.
    pub fn task(&mut self, offset: usize, num: usize) -> Result<()> {
        self.spawn(offset, num, 0)?;
        self.wait(false);
        Ok(())
    }

    /// Run the whole table to completion.
    pub fn run(&mut self) -> Result<()> {
        self.task(0, self.participant.table.cardinality())
    }

    /// Aggregate every queued push-down range on the calling thread.
    /// Returns the rows consumed.
    pub fn consume_pushdown(&mut self) -> usize {
        let Self { participant, kernel_config, domain, caller, .. } = self;
        let kernel =
            caller.get_or_insert_with(|| Kernel::build(Arc::clone(&participant.table), *kernel_config, *domain));
        kernel.reset();
        let rows = kernel.consume_pushdown(&participant.pushdown);
        kernel.merge_into(&participant.global);
        let stats = kernel.take_stats();
        let profile = kernel.take_profile();
        let mut state = participant.coord.state.lock();
        state.stats.absorb(&stats);
        state.profile.absorb(&profile);
        debug!(rows, "push-down ranges consumed");
        rows
    }

    /// Accumulated result of every query since the last [`MorselScheduler::clear`].
    pub fn result(&self) -> QueryResult {
        QueryResult::from_global(&self.participant.global, &self.domain)
    }

    /// Summed batch counters of every participant.
    pub fn stats(&self) -> KernelStats {
        self.participant.coord.state.lock().stats
    }

    /// Summed stage counters of every participant.
    pub fn profile(&self) -> KernelProfile {
        self.participant.coord.state.lock().profile.clone()
    }

    /// Zero the shared result, the push-down bitmap and the counters.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.participant.coord.state.lock();
        if state.stage == Stage::Query {
            return Err(ExecError::QueryInFlight);
        }
        self.participant.global.reset();
        self.participant.pushdown.clear();
        state.stats = KernelStats::default();
        state.profile = KernelProfile::default();
        Ok(())
    }
}

impl Drop for MorselScheduler {
    fn drop(&mut self) {
        self.participant.coord.destroy();
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                warn!("worker panicked");
            }
        }
    }
}
