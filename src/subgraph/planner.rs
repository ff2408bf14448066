//! Execution domain planning for fused subgraphs
//!
//! Planning turns a [`SubgraphDescriptor`] into a [`SubgraphPlan`]:
//!
//! 1. Left-pad every port to the common tensor rank (at least
//!    [`BOUNDED_RANK`]).
//! 2. Broadcast the padded dims into the master shape.
//! 3. Collapse the two innermost dims while the kernel's inner extent is
//!    below the configured threshold and every port stays contiguous (or
//!    fully broadcast) across the pair.
//! 4. Pick the tile rank.
//! 5. Derive per-port strides in elements, 0 along broadcast dims.

use super::descriptor::{PortDesc, SubgraphDescriptor};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::tensor::{Shape, Strides, extents_compatible};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Rank every domain is padded to; plans of this rank use the fixed-arity
/// scheduler
pub const BOUNDED_RANK: usize = 6;

/// Highest port rank a subgraph may have
pub const MAX_RANK: usize = 12;

/// Highest number of trailing dims handled inside one kernel invocation
pub const MAX_TILE_RANK: usize = 2;

/// Iteration space of one fused subgraph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionDomain {
    master_shape: Shape,
    domain: Shape,
    tile_rank: usize,
    full_work_amount: usize,
    harness_work_amount: usize,
}

impl ExecutionDomain {
    /// Broadcast shape of all ports, at the highest port rank
    pub fn master_shape(&self) -> &[usize] {
        &self.master_shape
    }

    /// Extents in execution order, after collapsing
    pub fn domain(&self) -> &[usize] {
        &self.domain
    }

    /// Rank of the padded domain
    pub fn tensor_rank(&self) -> usize {
        self.domain.len()
    }

    /// Trailing dims iterated inside the kernel (1 or 2)
    pub fn tile_rank(&self) -> usize {
        self.tile_rank
    }

    /// Product of all extents
    pub fn full_work_amount(&self) -> usize {
        self.full_work_amount
    }

    /// Number of kernel invocations (product of the untiled extents)
    pub fn harness_work_amount(&self) -> usize {
        self.harness_work_amount
    }

    /// Extents walked by the scheduler
    pub fn outer_extents(&self) -> &[usize] {
        &self.domain[..self.tensor_rank() - self.tile_rank]
    }

    /// Extents of the kernel's internal loop, outermost first, always two
    /// entries with a leading 1 when only one dim is tiled
    pub fn tile_extents(&self) -> [usize; MAX_TILE_RANK] {
        let rank = self.tensor_rank();
        let last = self.domain[rank - 1];
        if self.tile_rank == 2 {
            [self.domain[rank - 2], last]
        } else {
            [1, last]
        }
    }

    /// Whether the domain has no elements
    pub fn is_empty(&self) -> bool {
        self.full_work_amount == 0
    }
}

/// How one port is addressed over the domain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorAccess {
    /// Element offset of index zero
    pub offset: usize,
    /// Element stride per domain dim, 0 where the port is broadcast or the
    /// extent is 1
    pub strides: Strides,
    /// Bytes per element
    pub elem_size: usize,
}

impl TensorAccess {
    /// Byte offset of the element at `index` (leading domain dims)
    pub fn byte_offset(&self, index: &[usize]) -> isize {
        let elements = index
            .iter()
            .zip(self.strides.iter())
            .fold(self.offset as isize, |acc, (&i, &s)| acc + i as isize * s);
        elements * self.elem_size as isize
    }

    /// Byte strides of the tiled dims, matching [`ExecutionDomain::tile_extents`]
    pub fn tile_byte_strides(&self, tile_rank: usize) -> [isize; MAX_TILE_RANK] {
        let rank = self.strides.len();
        let size = self.elem_size as isize;
        let last = self.strides[rank - 1] * size;
        if tile_rank == 2 {
            [self.strides[rank - 2] * size, last]
        } else {
            [0, last]
        }
    }
}

/// Frozen result of planning one descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgraphPlan {
    /// Iteration space
    pub domain: ExecutionDomain,
    /// Addressing per port, inputs first
    pub accesses: Vec<TensorAccess>,
    num_inputs: usize,
}

impl SubgraphPlan {
    /// Addressing of the input ports
    pub fn inputs(&self) -> &[TensorAccess] {
        &self.accesses[..self.num_inputs]
    }

    /// Addressing of the output ports
    pub fn outputs(&self) -> &[TensorAccess] {
        &self.accesses[self.num_inputs..]
    }
}

/// Computes execution domains
#[derive(Clone, Debug)]
pub struct DomainPlanner {
    min_kernel_work: usize,
    workers: usize,
}

impl DomainPlanner {
    /// Planner using the configured work threshold and worker count
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            min_kernel_work: config.min_kernel_work.max(1),
            workers: config.worker_count().max(1),
        }
    }

    /// Override the number of workers collapsing must keep busy
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Plan the iteration of `desc`
    pub fn plan(&self, desc: &SubgraphDescriptor) -> Result<SubgraphPlan> {
        if desc.num_ports() == 0 {
            return Err(Error::InvalidArgument {
                arg: "desc",
                reason: "subgraph has no ports".into(),
            });
        }

        let max_rank = desc.ports().map(PortDesc::rank).max().unwrap_or(0);
        if max_rank > MAX_RANK {
            return Err(Error::UnsupportedRank {
                rank: max_rank,
                max: MAX_RANK,
            });
        }
        check_orders(desc, max_rank)?;

        let rank = max_rank.max(BOUNDED_RANK);
        let mut dims: Vec<Shape> = desc.ports().map(|p| p.blocked_dims.left_padded(rank)).collect();

        let mut domain = Shape::from(vec![1; rank]);
        for (port, padded) in desc.ports().zip(&dims) {
            if domain.iter().zip(padded.iter()).any(|(&d, &p)| !extents_compatible(d, p)) {
                let master = domain[rank - max_rank..].to_vec();
                return Err(Error::broadcast(&master, &port.blocked_dims));
            }
            for (d, &p) in domain.iter_mut().zip(padded.iter()) {
                if *d == 1 {
                    *d = p;
                }
            }
        }
        let master_shape: Shape = domain[rank - max_rank..].iter().copied().collect();
        let full_work_amount = domain
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::InvalidArgument {
                arg: "blocked_dims",
                reason: format!("domain {master_shape:?} overflows usize"),
            })?;

        self.collapse(&mut domain, &mut dims, full_work_amount);

        let tile_rank = tile_rank(desc, &domain, &dims);
        let harness_work_amount = if full_work_amount == 0 {
            0
        } else {
            domain[..rank - tile_rank].iter().product()
        };

        let accesses = desc
            .ports()
            .zip(&dims)
            .map(|(port, padded)| access(port, padded, &domain))
            .collect();

        debug!(
            ?master_shape,
            domain = ?domain.as_slice(),
            tile_rank,
            full_work_amount,
            harness_work_amount,
            "planned subgraph domain"
        );

        Ok(SubgraphPlan {
            domain: ExecutionDomain {
                master_shape,
                domain,
                tile_rank,
                full_work_amount,
                harness_work_amount,
            },
            accesses,
            num_inputs: desc.inputs.len(),
        })
    }

    /// Merge the two innermost dims while it pays off and is safe
    ///
    /// Each merge multiplies the innermost extent by the one before it,
    /// shifts the outer dims right and puts a 1 in front, so the rank and
    /// the full work amount stay unchanged.
    fn collapse(&self, domain: &mut Shape, dims: &mut [Shape], full_work_amount: usize) {
        let rank = domain.len();
        if full_work_amount == 0 {
            return;
        }

        for _ in 0..rank - 1 {
            let inner = domain[rank - 1];
            let next = domain[rank - 2];
            if inner >= self.min_kernel_work || next == 1 {
                break;
            }
            let Some(merged) = inner.checked_mul(next) else {
                break;
            };
            if full_work_amount / merged < self.workers {
                break;
            }
            let mergeable = dims.iter().all(|p| {
                let dense = p[rank - 2] == next && p[rank - 1] == inner;
                let broadcast = p[rank - 2] == 1 && p[rank - 1] == 1;
                dense || broadcast
            });
            if !mergeable {
                break;
            }

            merge_last_two(domain);
            for p in dims.iter_mut() {
                merge_last_two(p);
            }
        }
    }
}

fn merge_last_two(shape: &mut Shape) {
    let rank = shape.len();
    shape[rank - 1] *= shape[rank - 2];
    shape.copy_within(0..rank - 2, 1);
    shape[0] = 1;
}

fn check_orders(desc: &SubgraphDescriptor, max_rank: usize) -> Result<()> {
    let mut expected: Option<&PortDesc> = None;
    for (index, port) in desc.ports().enumerate() {
        port.validate_order()?;
        if port.rank() != max_rank {
            // lower-rank ports broadcast into the planar trailing dims
            if !port.order.iter().copied().eq(0..port.rank()) {
                return Err(Error::LayoutMismatch {
                    port: index,
                    expected: (0..port.rank()).collect(),
                    got: port.order.to_vec(),
                });
            }
            continue;
        }
        match expected {
            None => expected = Some(port),
            Some(first) if first.order != port.order => {
                return Err(Error::LayoutMismatch {
                    port: index,
                    expected: first.order.to_vec(),
                    got: port.order.to_vec(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// 2 when every port has one element size and a unit (or irrelevant)
/// stride in the innermost dim
fn tile_rank(desc: &SubgraphDescriptor, domain: &[usize], dims: &[Shape]) -> usize {
    let rank = domain.len();
    let mut sizes = desc.ports().map(PortDesc::elem_size);
    let first = sizes.next().unwrap_or(0);
    let uniform_size = sizes.all(|s| s == first);
    let unit_inner = domain[rank - 1] == 1 || dims.iter().all(|p| p[rank - 1] == domain[rank - 1]);

    if uniform_size && unit_inner {
        MAX_TILE_RANK
    } else {
        1
    }
}

fn access(port: &PortDesc, padded: &[usize], domain: &[usize]) -> TensorAccess {
    let dense = Strides::dense(padded);
    let strides = padded
        .iter()
        .zip(domain)
        .zip(dense.iter())
        .map(|((&p, &d), &s)| if p == d && d > 1 { s } else { 0 })
        .collect();
    TensorAccess {
        offset: port.offset,
        strides,
        elem_size: port.elem_size(),
    }
}

/// Last plan of a subgraph, reused while port dims stay the same
#[derive(Debug, Default)]
pub struct PlanCache {
    entry: Mutex<Option<(SubgraphDescriptor, Arc<SubgraphPlan>)>>,
}

impl PlanCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for `desc`, planning again when any port changed
    pub fn get_or_plan(
        &self,
        planner: &DomainPlanner,
        desc: &SubgraphDescriptor,
    ) -> Result<Arc<SubgraphPlan>> {
        let mut entry = self.entry.lock();
        if let Some((cached, plan)) = entry.as_ref() {
            if cached == desc {
                debug!("subgraph plan cache hit");
                return Ok(plan.clone());
            }
        }
        let plan = Arc::new(planner.plan(desc)?);
        *entry = Some((desc.clone(), plan.clone()));
        Ok(plan)
    }

    /// Drop the cached plan
    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn planner(workers: usize) -> DomainPlanner {
        DomainPlanner::new(&RuntimeConfig::default()).with_workers(workers)
    }

    fn desc(inputs: &[&[usize]], output: &[usize]) -> SubgraphDescriptor {
        SubgraphDescriptor::new(
            inputs.iter().map(|d| PortDesc::new(DType::F32, *d)).collect(),
            vec![PortDesc::new(DType::F32, output)],
        )
    }

    #[test]
    fn test_broadcast_add() {
        let plan = planner(8).plan(&desc(&[&[2, 3], &[1, 3]], &[2, 3])).unwrap();
        let d = &plan.domain;
        assert_eq!(d.master_shape(), &[2, 3]);
        assert_eq!(d.tensor_rank(), BOUNDED_RANK);
        assert_eq!(d.tile_rank(), 2);
        assert_eq!(d.full_work_amount(), 6);
        assert_eq!(d.harness_work_amount(), 1);
        assert_eq!(d.tile_extents(), [2, 3]);

        assert_eq!(plan.inputs()[1].strides.as_slice(), &[0, 0, 0, 0, 0, 1]);
        assert_eq!(plan.inputs()[1].tile_byte_strides(2), [0, 4]);
        assert_eq!(plan.outputs()[0].tile_byte_strides(2), [12, 4]);
    }

    #[test]
    fn test_collapse_contiguous() {
        let plan = planner(1).plan(&desc(&[&[4, 8, 16], &[4, 8, 16]], &[4, 8, 16])).unwrap();
        let d = &plan.domain;
        assert_eq!(d.domain(), &[1, 1, 1, 1, 1, 512]);
        assert_eq!(d.master_shape(), &[4, 8, 16]);
        assert_eq!(d.full_work_amount(), 512);
        assert_eq!(d.harness_work_amount(), 1);
        for access in &plan.accesses {
            assert_eq!(access.strides[BOUNDED_RANK - 1], 1);
        }
    }

    #[test]
    fn test_collapse_stops_at_threshold() {
        let plan = planner(1).plan(&desc(&[&[64, 256, 2]], &[64, 256, 2])).unwrap();
        assert_eq!(plan.domain.domain(), &[1, 1, 1, 1, 64, 512]);
    }

    #[test]
    fn test_collapse_keeps_workers_busy() {
        let plan = planner(4).plan(&desc(&[&[4, 8, 16]], &[4, 8, 16])).unwrap();
        assert_eq!(plan.domain.domain(), &[1, 1, 1, 1, 4, 128]);
    }

    #[test]
    fn test_no_collapse_across_partial_broadcast() {
        let plan = planner(1).plan(&desc(&[&[4, 8, 16], &[8, 1]], &[4, 8, 16])).unwrap();
        assert_eq!(plan.domain.domain(), &[1, 1, 1, 4, 8, 16]);
        assert_eq!(plan.domain.tile_rank(), 1);
        assert_eq!(plan.domain.harness_work_amount(), 32);
        assert_eq!(plan.inputs()[1].strides.as_slice(), &[0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_mixed_element_sizes_tile_one() {
        let desc = SubgraphDescriptor::new(
            vec![PortDesc::new(DType::F32, [3, 5]), PortDesc::new(DType::F16, [3, 5])],
            vec![PortDesc::new(DType::F32, [3, 5])],
        );
        let plan = planner(8).plan(&desc).unwrap();
        assert_eq!(plan.domain.tile_rank(), 1);
        assert_eq!(plan.domain.harness_work_amount(), 3);
        assert_eq!(plan.domain.tile_extents(), [1, 5]);
        assert_eq!(plan.inputs()[1].elem_size, 2);
    }

    #[test]
    fn test_high_rank_keeps_rank() {
        let dims = [2, 1, 2, 1, 2, 1, 2, 3];
        let plan = planner(1).plan(&desc(&[&dims], &dims)).unwrap();
        assert_eq!(plan.domain.tensor_rank(), 8);
        assert_eq!(plan.domain.full_work_amount(), 48);
    }

    #[test]
    fn test_errors() {
        let p = planner(1);
        assert!(matches!(
            p.plan(&desc(&[&[2, 3], &[4, 3]], &[2, 3])),
            Err(Error::BroadcastError { .. })
        ));
        assert!(matches!(
            p.plan(&desc(&[&[1; 13]], &[1; 13])),
            Err(Error::UnsupportedRank { rank: 13, max: MAX_RANK })
        ));
        assert!(matches!(
            p.plan(&SubgraphDescriptor::default()),
            Err(Error::InvalidArgument { .. })
        ));

        let mismatched = SubgraphDescriptor::new(
            vec![PortDesc::new(DType::F32, [2, 3]).with_order(&[1, 0])],
            vec![PortDesc::new(DType::F32, [2, 3])],
        );
        assert!(matches!(
            p.plan(&mismatched),
            Err(Error::LayoutMismatch { port: 1, .. })
        ));
    }

    #[test]
    fn test_zero_size() {
        let plan = planner(1).plan(&desc(&[&[0, 3]], &[0, 3])).unwrap();
        assert!(plan.domain.is_empty());
        assert_eq!(plan.domain.harness_work_amount(), 0);
    }

    #[test]
    fn test_offset_and_byte_offset() {
        let desc = SubgraphDescriptor::new(
            vec![PortDesc::new(DType::F64, [2, 3]).with_offset(5)],
            vec![PortDesc::new(DType::F64, [2, 3])],
        );
        let plan = planner(8).plan(&desc).unwrap();
        let access = &plan.inputs()[0];
        assert_eq!(access.byte_offset(&[0, 0, 0, 0]), 40);
        assert_eq!(access.byte_offset(&[0, 0, 0, 0, 1]), 64);
    }

    #[test]
    fn test_cache_reuse() {
        let cache = PlanCache::new();
        let p = planner(1);
        let a = cache.get_or_plan(&p, &desc(&[&[2, 3]], &[2, 3])).unwrap();
        let b = cache.get_or_plan(&p, &desc(&[&[2, 3]], &[2, 3])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_plan(&p, &desc(&[&[4, 3]], &[4, 3])).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.domain.full_work_amount(), 12);
    }
}
