//! Block partitioning and parallel dispatch.
//!
//! ```text
//! left:   [0 ─────── 9][10 ────── 19][20 ────── 29]
//! right:        [4 ──────── 14][14 ──────── 24]
//! ```
//!
//! Right blocks are centered on left block boundaries, so most layers are
//! solved twice and can be reconciled by the merger.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolveError};
use crate::solve::{BlockId, SolveItem};

/// Which staggered series a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSeries {
    /// Non-overlapping blocks of the requested size
    Left,
    /// Blocks spanning the middles of two neighboring left blocks
    Right,
}

/// A block to solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDefinition {
    /// Block id (parts are assigned by the solver)
    pub id: BlockId,
    /// First layer
    pub min_z: i64,
    /// Last layer
    pub max_z: i64,
    /// Series
    pub series: BlockSeries,
}

/// Left and right block series over a layer range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveSet {
    /// Left series
    pub left: Vec<BlockDefinition>,
    /// Right series, one fewer than `left`
    pub right: Vec<BlockDefinition>,
}

impl SolveSet {
    /// Left blocks followed by right blocks.
    pub fn all(&self) -> Vec<BlockDefinition> {
        self.left.iter().chain(&self.right).copied().collect()
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// No blocks.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

impl fmt::Display for SolveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, left) in self.left.iter().enumerate() {
            write!(f, "{}: {} >> {}", left.id, left.min_z, left.max_z)?;
            if let Some(right) = self.right.get(i) {
                writeln!(f)?;
                writeln!(f, "\t{}: {} >> {}", right.id, right.min_z, right.max_z)?;
            }
        }
        Ok(())
    }
}

/// Partition `[min_z, max_z]` into left blocks of `block_size` layers and
/// right blocks offset by half a block.
///
/// Left blocks get ids `0..n`, right blocks `n..2n-1`.
pub fn define_solve_set(min_z: i64, max_z: i64, block_size: usize) -> Result<SolveSet> {
    if block_size == 0 {
        return Err(SolveError::Config("block size must be positive".into()));
    }
    if min_z > max_z {
        return Err(SolveError::Config(format!(
            "empty layer range [{min_z}, {max_z}]"
        )));
    }

    let size = block_size as i64;
    let layers = max_z - min_z + 1;
    let count = (layers + size - 1) / size;

    let left: Vec<BlockDefinition> = (0..count)
        .map(|i| BlockDefinition {
            id: BlockId::new(i as usize),
            min_z: min_z + i * size,
            max_z: (min_z + (i + 1) * size - 1).min(max_z),
            series: BlockSeries::Left,
        })
        .collect();

    let mid = |b: &BlockDefinition| (b.min_z + b.max_z).div_euclid(2);
    let right = left
        .windows(2)
        .enumerate()
        .map(|(i, pair)| BlockDefinition {
            id: BlockId::new(left.len() + i),
            min_z: mid(&pair[0]),
            max_z: mid(&pair[1]),
            series: BlockSeries::Right,
        })
        .collect();

    Ok(SolveSet { left, right })
}

/// Dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads; 0 uses the available parallelism
    #[serde(default)]
    pub workers: usize,
    /// Extra attempts for a failing block
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_max_retries() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_retries: default_max_retries(),
        }
    }
}

impl SchedulerConfig {
    fn worker_count(&self, jobs: usize) -> usize {
        let wanted = if self.workers == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.workers
        };
        wanted.clamp(1, jobs.max(1))
    }
}

/// Outcome of solving a set of blocks.
#[derive(Debug, Default)]
pub struct BlockResults {
    /// Solved items of every successful block, sorted by id
    pub solved: Vec<SolveItem>,
    /// Blocks that failed every attempt, sorted by id
    pub failures: Vec<(BlockId, SolveError)>,
}

/// Runs block solves on a pool of scoped worker threads.
#[derive(Debug, Clone, Default)]
pub struct DistributedScheduler {
    config: SchedulerConfig,
}

impl DistributedScheduler {
    /// Create a scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Dispatch settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Solve every block with `solve`, retrying failures.
    ///
    /// Blocks run independently; a failure is reported per block and never
    /// stops the others. A panicking block is reported as
    /// [`SolveError::BlockPanicked`] and is not retried.
    pub fn run<F>(&self, blocks: &[BlockDefinition], solve: F) -> BlockResults
    where
        F: Fn(&BlockDefinition) -> Result<Vec<SolveItem>> + Sync,
    {
        let (job_tx, job_rx) = unbounded::<BlockDefinition>();
        let (result_tx, result_rx) = unbounded();
        for block in blocks {
            let _ = job_tx.send(*block);
        }
        drop(job_tx);

        let workers = self.config.worker_count(blocks.len());
        let attempts = self.config.max_retries + 1;
        log::info!("dispatching {} blocks to {} workers", blocks.len(), workers);

        let solve = &solve;
        thread::scope(|scope| {
            let mut spawned = 0;
            for w in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("block-worker-{w}"))
                    .spawn_scoped(scope, move || {
                        for block in job_rx.iter() {
                            let outcome = solve_with_retries(&block, solve, attempts);
                            let _ = result_tx.send((block.id, outcome));
                        }
                    });
                match handle {
                    Ok(_) => spawned += 1,
                    Err(e) => log::warn!("failed to spawn block worker {}: {}", w, e),
                }
            }

            if spawned == 0 {
                for block in job_rx.iter() {
                    let outcome = solve_with_retries(&block, solve, attempts);
                    let _ = result_tx.send((block.id, outcome));
                }
            }
            drop(result_tx);
        });

        let mut results = BlockResults::default();
        for (id, outcome) in result_rx.iter() {
            match outcome {
                Ok(items) => results.solved.extend(items),
                Err(e) => results.failures.push((id, e)),
            }
        }
        results.solved.sort_by_key(SolveItem::id);
        results.failures.sort_by_key(|(id, _)| *id);

        log::info!(
            "{} block parts solved, {} blocks failed",
            results.solved.len(),
            results.failures.len()
        );
        results
    }
}

fn solve_with_retries<F>(
    block: &BlockDefinition,
    solve: &F,
    attempts: usize,
) -> Result<Vec<SolveItem>>
where
    F: Fn(&BlockDefinition) -> Result<Vec<SolveItem>>,
{
    let mut attempt = 1;
    loop {
        match catch_unwind(AssertUnwindSafe(|| solve(block))) {
            Ok(Ok(items)) => return Ok(items),
            Ok(Err(e)) if attempt < attempts => {
                log::warn!(
                    "block {}: attempt {}/{} failed: {}",
                    block.id,
                    attempt,
                    attempts,
                    e
                );
                attempt += 1;
            }
            Ok(Err(e)) => {
                log::warn!("block {}: giving up: {}", block.id, e);
                return Err(e);
            }
            // not retried
            Err(payload) => {
                let e = SolveError::BlockPanicked(panic_message(&*payload));
                log::warn!("block {}: {}", block.id, e);
                return Err(e);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
