//! Parallel iteration of fused kernels over a planned domain
//!
//! The outer (untiled) part of the domain is split into one contiguous run
//! of flat indices per task with [`split_range`]. Rank-6 plans walk their
//! five outer dims with an odometer that is advanced after every call;
//! higher ranks decompose each flat index separately.

use super::kernel::{FusedKernel, KernelArgs, KernelError};
use super::planner::{BOUNDED_RANK, MAX_RANK, MAX_TILE_RANK, SubgraphPlan, TensorAccess};
use super::scratchpad::{ScratchRegions, Scratchpad};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Outer dims walked by the fixed-arity path
const BOUNDED_OUTER: usize = BOUNDED_RANK - 1;

/// Contiguous share of `[0, work)` assigned to `task` out of `n_tasks`
///
/// The first `work % n_tasks` tasks get one extra item, so shares differ by
/// at most one and tile the range in task order.
pub fn split_range(work: usize, n_tasks: usize, task: usize) -> Range<usize> {
    if n_tasks <= 1 || work == 0 {
        return if task == 0 { 0..work } else { work..work };
    }
    let big = work.div_ceil(n_tasks);
    let small = big - 1;
    let n_big = work - small * n_tasks;
    let (start, len) = if task < n_big {
        (task * big, big)
    } else {
        (n_big * big + (task - n_big) * small, small)
    };
    let start = start.min(work);
    start..(start + len).min(work)
}

/// Base addresses of the port buffers of one run
#[derive(Clone, Debug, Default)]
pub struct PortBuffers {
    inputs: SmallVec<[usize; 8]>,
    outputs: SmallVec<[usize; 4]>,
}

impl PortBuffers {
    /// Buffers from raw base pointers, inputs and outputs in port order
    pub fn new(inputs: &[*const u8], outputs: &[*mut u8]) -> Self {
        Self {
            inputs: inputs.iter().map(|&p| p as usize).collect(),
            outputs: outputs.iter().map(|&p| p as usize).collect(),
        }
    }

    /// Number of input buffers
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output buffers
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
}

/// Runs fused kernels over planned domains
///
/// Owns a rayon pool when a worker count is configured, otherwise uses the
/// global pool. The scratchpad is shared by every run of this scheduler.
pub struct SubgraphScheduler {
    config: RuntimeConfig,
    workers: usize,
    #[cfg(feature = "rayon")]
    pool: Option<rayon::ThreadPool>,
    scratchpad: Mutex<Scratchpad>,
}

impl SubgraphScheduler {
    /// Scheduler for `config`
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        #[cfg(feature = "rayon")]
        let pool = match config.num_threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("graphrt-{i}"))
                    .build()
                    .map_err(|e| Error::Internal(format!("failed to build thread pool: {e}")))?,
            ),
            None => None,
        };
        let workers = config.worker_count().max(1);
        Ok(Self {
            config,
            workers,
            #[cfg(feature = "rayon")]
            pool,
            scratchpad: Mutex::new(Scratchpad::new()),
        })
    }

    /// Configuration this scheduler was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Upper bound on concurrently running tasks
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Bytes currently held by the scratchpad
    pub fn scratchpad_capacity(&self) -> usize {
        self.scratchpad.lock().capacity()
    }

    /// Invoke `kernel` once per outer index of `plan`
    ///
    /// Returns after every task has finished. The first kernel error stops
    /// the remaining invocations and is returned as [`Error::KernelFailed`];
    /// outputs are then partially written.
    ///
    /// # Safety
    ///
    /// Each buffer in `buffers` must be live for the duration of the call and
    /// large enough for every element its [`TensorAccess`] addresses over the
    /// plan's domain. Output buffers must not be accessed elsewhere while the
    /// call runs.
    pub unsafe fn run(
        &self,
        kernel: &dyn FusedKernel,
        plan: &SubgraphPlan,
        buffers: &PortBuffers,
    ) -> Result<()> {
        if buffers.num_inputs() != plan.inputs().len() {
            return Err(Error::InputCountMismatch {
                expected: plan.inputs().len(),
                got: buffers.num_inputs(),
            });
        }
        if buffers.num_outputs() != plan.outputs().len() {
            return Err(Error::OutputCountMismatch {
                expected: plan.outputs().len(),
                got: buffers.num_outputs(),
            });
        }

        let domain = &plan.domain;
        if domain.is_empty() {
            debug!("empty domain, no kernel invocations");
            return Ok(());
        }

        let n_tasks = self.workers.min(domain.harness_work_amount()).max(1);
        let mut scratchpad = self.scratchpad.lock();
        let regions = scratchpad.reserve(kernel.scratchpad_size(), n_tasks);

        let harness = Harness {
            kernel,
            plan,
            buffers,
            tile_strides: plan
                .accesses
                .iter()
                .map(|a| a.tile_byte_strides(domain.tile_rank()))
                .collect(),
            regions,
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        };
        let bounded = domain.tensor_rank() == BOUNDED_RANK;
        trace!(
            n_tasks,
            bounded,
            harness = domain.harness_work_amount(),
            "running fused kernel"
        );

        self.for_each_task(n_tasks, |task| {
            // SAFETY: forwarded from the caller's contract on `buffers`.
            unsafe {
                if bounded {
                    harness.run_bounded(task, n_tasks);
                } else {
                    harness.run_flat(task, n_tasks);
                }
            }
        });
        drop(scratchpad);

        match harness.failure.into_inner() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn for_each_task(&self, n_tasks: usize, f: impl Fn(usize) + Send + Sync) {
        if n_tasks <= 1 {
            f(0);
            return;
        }

        #[cfg(feature = "rayon")]
        {
            let run = || (0..n_tasks).into_par_iter().for_each(&f);
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        }

        #[cfg(not(feature = "rayon"))]
        (0..n_tasks).for_each(f);
    }
}

impl fmt::Debug for SubgraphScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubgraphScheduler")
            .field("workers", &self.workers)
            .field("scratchpad", &self.scratchpad_capacity())
            .finish()
    }
}

/// State shared by the tasks of one run
struct Harness<'a> {
    kernel: &'a dyn FusedKernel,
    plan: &'a SubgraphPlan,
    buffers: &'a PortBuffers,
    tile_strides: SmallVec<[[isize; MAX_TILE_RANK]; 8]>,
    regions: ScratchRegions,
    abort: AtomicBool,
    failure: Mutex<Option<KernelError>>,
}

/// Pointers of one task, reused across its invocations
#[derive(Default)]
struct TaskPointers {
    inputs: SmallVec<[*const u8; 8]>,
    outputs: SmallVec<[*mut u8; 4]>,
}

impl Harness<'_> {
    /// Fixed-arity walk over the five outer dims, tiled dims pinned to 1
    unsafe fn run_bounded(&self, task: usize, n_tasks: usize) {
        let domain = &self.plan.domain;
        let outer = domain.outer_extents();
        let mut extents = [1usize; BOUNDED_OUTER];
        extents[..outer.len()].copy_from_slice(outer);

        let range = split_range(domain.harness_work_amount(), n_tasks, task);
        let mut index = [0usize; BOUNDED_OUTER];
        let mut rest = range.start;
        for k in (0..BOUNDED_OUTER).rev() {
            index[k] = rest % extents[k];
            rest /= extents[k];
        }

        let mut ptrs = TaskPointers::default();
        for _ in range {
            if !self.invoke(task, &index[..outer.len()], &mut ptrs) {
                return;
            }
            for k in (0..BOUNDED_OUTER).rev() {
                index[k] += 1;
                if index[k] < extents[k] {
                    break;
                }
                index[k] = 0;
            }
        }
    }

    /// Flat walk decomposing every index over the outer extents
    unsafe fn run_flat(&self, task: usize, n_tasks: usize) {
        let extents = self.plan.domain.outer_extents();
        let range = split_range(self.plan.domain.harness_work_amount(), n_tasks, task);
        let mut index: SmallVec<[usize; MAX_RANK]> = SmallVec::from_elem(0, extents.len());

        let mut ptrs = TaskPointers::default();
        for flat in range {
            let mut rest = flat;
            for (i, &extent) in index.iter_mut().zip(extents).rev() {
                *i = rest % extent;
                rest /= extent;
            }
            if !self.invoke(task, &index, &mut ptrs) {
                return;
            }
        }
    }

    /// One kernel call; false once the run is aborted
    unsafe fn invoke(&self, task: usize, index: &[usize], ptrs: &mut TaskPointers) -> bool {
        if self.abort.load(Ordering::Acquire) {
            return false;
        }

        ptrs.inputs.clear();
        ptrs.inputs.extend(
            self.buffers
                .inputs
                .iter()
                .zip(self.plan.inputs())
                .map(|(&base, access)| address(base, access, index) as *const u8),
        );
        ptrs.outputs.clear();
        ptrs.outputs.extend(
            self.buffers
                .outputs
                .iter()
                .zip(self.plan.outputs())
                .map(|(&base, access)| address(base, access, index)),
        );

        let (scratchpad, scratchpad_len) = self.regions.region(task);
        let args = KernelArgs {
            inputs: &ptrs.inputs,
            outputs: &ptrs.outputs,
            tile_strides: &self.tile_strides,
            tile_extents: self.plan.domain.tile_extents(),
            outer_index: index,
            scratchpad,
            scratchpad_len,
        };
        match self.kernel.call(&args) {
            Ok(()) => true,
            Err(err) => {
                debug!(?index, error = %err, "kernel failed, aborting run");
                let mut failure = self.failure.lock();
                if failure.is_none() {
                    *failure = Some(err);
                }
                self.abort.store(true, Ordering::Release);
                false
            }
        }
    }
}

fn address(base: usize, access: &TensorAccess, index: &[usize]) -> *mut u8 {
    (base as *mut u8).wrapping_offset(access.byte_offset(index))
}
