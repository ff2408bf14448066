//! Integration tests for execution domain planning
//!
//! Tests verify:
//! - Master shape and tile rank for broadcast inputs
//! - Work amounts before and after dimension collapsing
//! - Per-port addressing against a direct broadcast computation
//! - Rejection of unsupported ranks, shapes and layouts

use graphrt::config::RuntimeConfig;
use graphrt::dtype::DType;
use graphrt::error::Error;
use graphrt::subgraph::{
    BOUNDED_RANK, DomainPlanner, MAX_RANK, PlanCache, PortDesc, SubgraphDescriptor, SubgraphPlan,
};
use proptest::prelude::*;
use std::sync::Arc;

fn planner(workers: usize, min_kernel_work: usize) -> DomainPlanner {
    DomainPlanner::new(&RuntimeConfig::default().with_min_kernel_work(min_kernel_work))
        .with_workers(workers)
}

fn f32_desc(inputs: &[Vec<usize>], output: &[usize]) -> SubgraphDescriptor {
    SubgraphDescriptor::new(
        inputs
            .iter()
            .map(|d| PortDesc::new(DType::F32, d.as_slice()))
            .collect(),
        vec![PortDesc::new(DType::F32, output)],
    )
}

/// Element offset of `port` at the flat master index `flat`, computed
/// directly from numpy broadcasting rules
fn broadcast_offset(master: &[usize], port: &[usize], flat: usize) -> isize {
    let pad = master.len() - port.len();
    let mut rest = flat;
    let mut offset = 0isize;
    let mut stride = 1isize;
    for k in (0..master.len()).rev() {
        let i = rest % master[k];
        rest /= master[k];
        if k >= pad {
            let extent = port[k - pad];
            if extent != 1 {
                offset += i as isize * stride;
            }
            stride *= extent as isize;
        }
    }
    offset
}

/// Element offset of port `p` at flat index `flat` of the planned domain
fn planned_offset(plan: &SubgraphPlan, p: usize, flat: usize) -> isize {
    let domain = plan.domain.domain();
    let strides = &plan.accesses[p].strides;
    let mut rest = flat;
    let mut offset = 0isize;
    for k in (0..domain.len()).rev() {
        offset += (rest % domain[k]) as isize * strides[k];
        rest /= domain[k];
    }
    offset
}

// ============================================================================
// Fixed cases
// ============================================================================

#[test]
fn test_broadcast_add_domain() {
    for workers in [1, 2, 8] {
        let plan = planner(workers, 256)
            .plan(&f32_desc(&[vec![2, 3], vec![1, 3]], &[2, 3]))
            .unwrap();
        let d = &plan.domain;
        assert_eq!(d.master_shape(), &[2, 3]);
        assert_eq!(d.tile_rank(), 2);
        assert_eq!(d.full_work_amount(), 6);
        assert_eq!(d.harness_work_amount(), 1);
    }
}

#[test]
fn test_bounded_rank_padding() {
    let plan = planner(1, 256).plan(&f32_desc(&[vec![7]], &[7])).unwrap();
    assert_eq!(plan.domain.tensor_rank(), BOUNDED_RANK);
    assert_eq!(plan.domain.domain(), &[1, 1, 1, 1, 1, 7]);
    assert_eq!(plan.domain.master_shape(), &[7]);
}

#[test]
fn test_rank_above_maximum_is_fatal() {
    let dims = vec![1; MAX_RANK + 1];
    let err = planner(1, 256).plan(&f32_desc(&[dims.clone()], &dims)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedRank { rank: 13, max: 12 }));
    assert!(err.is_configuration());

    let dims = vec![1; MAX_RANK];
    let plan = planner(1, 256).plan(&f32_desc(&[dims.clone()], &dims)).unwrap();
    assert_eq!(plan.domain.tensor_rank(), MAX_RANK);
}

#[test]
fn test_incompatible_shapes() {
    let err = planner(1, 256)
        .plan(&f32_desc(&[vec![2, 3], vec![3, 3]], &[2, 3]))
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastError { .. }));
}

#[test]
fn test_zero_size_domain() {
    let plan = planner(4, 256)
        .plan(&f32_desc(&[vec![4, 0, 3], vec![3]], &[4, 0, 3]))
        .unwrap();
    assert_eq!(plan.domain.master_shape(), &[4, 0, 3]);
    assert_eq!(plan.domain.full_work_amount(), 0);
    assert_eq!(plan.domain.harness_work_amount(), 0);
    assert!(plan.domain.is_empty());
}

#[test]
fn test_memory_orders() {
    let p = planner(1, 256);
    let transposed = |dims: &[usize]| PortDesc::new(DType::F32, dims).with_order(&[0, 2, 1]);

    let consistent = SubgraphDescriptor::new(
        vec![transposed(&[2, 4, 3]), PortDesc::new(DType::F32, [3])],
        vec![transposed(&[2, 4, 3])],
    );
    assert!(p.plan(&consistent).is_ok());

    let mixed = SubgraphDescriptor::new(
        vec![transposed(&[2, 4, 3])],
        vec![PortDesc::new(DType::F32, [2, 4, 3])],
    );
    match p.plan(&mixed).unwrap_err() {
        Error::LayoutMismatch { port, expected, got } => {
            assert_eq!(port, 1);
            assert_eq!(expected, [0, 2, 1]);
            assert_eq!(got, [0, 1, 2]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let not_permutation = SubgraphDescriptor::new(
        vec![PortDesc::new(DType::F32, [2, 3]).with_order(&[1, 1])],
        vec![],
    );
    assert!(matches!(
        p.plan(&not_permutation),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_lower_rank_port_requires_identity_order() {
    let desc = SubgraphDescriptor::new(
        vec![
            PortDesc::new(DType::F32, [2, 3, 3]),
            PortDesc::new(DType::F32, [3, 3]).with_order(&[1, 0]),
        ],
        vec![PortDesc::new(DType::F32, [2, 3, 3])],
    );
    match planner(1, 256).plan(&desc).unwrap_err() {
        Error::LayoutMismatch { port, expected, got } => {
            assert_eq!(port, 1);
            assert_eq!(expected, [0, 1]);
            assert_eq!(got, [1, 0]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_overflowing_domain_rejected() {
    let huge = usize::MAX / 2 + 1;
    let err = planner(1, 256)
        .plan(&f32_desc(&[vec![4, huge], vec![huge]], &[4, huge]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { arg: "blocked_dims", .. }));
}

#[test]
fn test_plan_cache_follows_shapes() {
    let cache = PlanCache::new();
    let p = planner(2, 256);
    let small = f32_desc(&[vec![2, 3]], &[2, 3]);
    let large = f32_desc(&[vec![5, 3]], &[5, 3]);

    let a = cache.get_or_plan(&p, &small).unwrap();
    let b = cache.get_or_plan(&p, &small).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = cache.get_or_plan(&p, &large).unwrap();
    assert_eq!(c.domain.master_shape(), &[5, 3]);
    let d = cache.get_or_plan(&p, &small).unwrap();
    assert!(!Arc::ptr_eq(&a, &d));
    assert_eq!(*a, *d);

    cache.clear();
    let e = cache.get_or_plan(&p, &small).unwrap();
    assert!(!Arc::ptr_eq(&d, &e));
}

// ============================================================================
// Properties
// ============================================================================

/// A master shape and input shapes broadcastable to it
fn broadcast_case() -> impl Strategy<Value = (Vec<usize>, Vec<Vec<usize>>)> {
    prop::collection::vec(1usize..=4, 1..=8).prop_flat_map(|master| {
        let rank = master.len();
        let dims = master.clone();
        let port = (0..=rank, prop::collection::vec(any::<bool>(), rank)).prop_map(
            move |(drop, ones)| {
                dims[drop..]
                    .iter()
                    .zip(&ones[drop..])
                    .map(|(&d, &one)| if one { 1 } else { d })
                    .collect::<Vec<usize>>()
            },
        );
        (Just(master), prop::collection::vec(port, 1..=3))
    })
}

proptest! {
    /// Every port is addressed exactly as numpy broadcasting prescribes,
    /// whatever dims the planner collapsed.
    #[test]
    fn prop_addressing_matches_broadcast(
        (master, inputs) in broadcast_case(),
        workers in 1usize..=8,
        min_work in prop::sample::select(vec![1usize, 4, 16, 256]),
    ) {
        let plan = planner(workers, min_work).plan(&f32_desc(&inputs, &master)).unwrap();
        prop_assert_eq!(plan.domain.master_shape(), master.as_slice());

        let full = plan.domain.full_work_amount();
        for flat in 0..full {
            for (p, port) in inputs.iter().chain(std::iter::once(&master)).enumerate() {
                prop_assert_eq!(
                    planned_offset(&plan, p, flat),
                    broadcast_offset(&master, port, flat),
                    "port {} flat {}", p, flat
                );
            }
        }
    }

    /// Collapsing keeps the amount of work, and the harness times the tile
    /// covers it.
    #[test]
    fn prop_work_amount_identity(
        (master, inputs) in broadcast_case(),
        workers in 1usize..=8,
    ) {
        let plan = planner(workers, 256).plan(&f32_desc(&inputs, &master)).unwrap();
        let d = &plan.domain;
        let expected: usize = master.iter().product();
        prop_assert_eq!(d.full_work_amount(), expected);
        prop_assert_eq!(d.domain().iter().product::<usize>(), expected);
        let [rows, cols] = d.tile_extents();
        prop_assert_eq!(d.harness_work_amount() * rows * cols, expected);
        prop_assert_eq!(d.tensor_rank(), master.len().max(BOUNDED_RANK));
        prop_assert!(d.tile_rank() == 1 || d.tile_rank() == 2);
    }
}
