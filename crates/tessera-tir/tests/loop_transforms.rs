use anyhow::Result;
use tessera_tir::{
    iv, lv, AnnValue, BlockRV, DType, Expr, FuncBuilder, ForKind, PrimFunc, ReduceKind, Schedule,
    ScheduleError,
};

fn matmul(m: i64, n: i64, k: i64) -> Result<(PrimFunc, BlockRV)> {
    let mut fb = FuncBuilder::new("matmul");
    let a = fb.input("A", &[m, k], DType::F32);
    let b = fb.input("B", &[k, n], DType::F32);
    let c = fb.output("C", &[m, n], DType::F32);
    let block = fb
        .block("C")
        .spatial(m)
        .spatial(n)
        .reduce(k)
        .accumulate(
            c,
            vec![iv(0), iv(1)],
            ReduceKind::Sum,
            Expr::load(a, vec![iv(0), iv(2)]) * Expr::load(b, vec![iv(2), iv(1)]),
        )
        .finish()?;
    Ok((fb.finish(), block))
}

fn extents(sch: &Schedule, block: BlockRV) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    for loop_rv in sch.get_loops(block)? {
        out.push(sch.for_loop(loop_rv)?.extent);
    }
    Ok(out)
}

#[test]
fn perfect_split_rebinds_iterator() -> Result<()> {
    let (func, block) = matmul(128, 128, 128)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let tiles = sch.split(loops[0], &[None, Some(32)])?;
    assert_eq!(tiles.len(), 2);
    assert_eq!(extents(&sch, block)?, vec![4, 32, 128, 128]);
    assert!(!sch.has_loop(loops[0]));

    let node = sch.block(block)?;
    assert_eq!(
        node.iter_vars[0].binding,
        lv(tiles[0]).scale(32).add(lv(tiles[1]))
    );
    assert!(node.predicates.is_empty());
    sch.verify()?;
    Ok(())
}

#[test]
fn imperfect_split_adds_predicate() -> Result<()> {
    let (func, block) = matmul(128, 64, 64)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let tiles = sch.split(loops[0], &[None, Some(48)])?;
    assert_eq!(extents(&sch, block)?, vec![3, 48, 64, 64]);

    let node = sch.block(block)?;
    assert_eq!(node.predicates.len(), 1);
    assert_eq!(node.predicates[0].bound, 128);
    let predicate = &node.predicates[0].expr;
    assert!(predicate.uses(tessera_tir::Var::Loop(tiles[0])));
    sch.verify()?;
    Ok(())
}

#[test]
fn invalid_split_leaves_schedule_untouched() -> Result<()> {
    let (func, block) = matmul(64, 64, 64)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;

    let err = sch
        .split(loops[0], &[None, None])
        .expect_err("two inferred factors");
    assert!(matches!(err, ScheduleError::InvalidFactors { .. }));
    let err = sch
        .split(loops[0], &[Some(2), Some(2)])
        .expect_err("product too small");
    assert!(matches!(err, ScheduleError::InvalidFactors { .. }));

    assert_eq!(sch.get_loops(block)?, loops);
    assert!(sch.trace().is_empty());
    Ok(())
}

#[test]
fn fuse_produces_div_mod_bindings() -> Result<()> {
    let (func, block) = matmul(128, 128, 32)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let fused = sch.fuse(&loops[..2])?;
    assert_eq!(extents(&sch, block)?, vec![128 * 128, 32]);

    let node = sch.block(block)?;
    assert_eq!(node.iter_vars[0].binding, lv(fused).floordiv(128));
    assert_eq!(node.iter_vars[1].binding, lv(fused).floormod(128));
    sch.verify()?;
    Ok(())
}

#[test]
fn fuse_rejects_non_adjacent_loops() -> Result<()> {
    let (func, block) = matmul(16, 16, 16)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let err = sch.fuse(&[loops[0], loops[2]]).expect_err("not a chain");
    assert!(matches!(err, ScheduleError::NotAChain(_)));
    assert_eq!(sch.get_loops(block)?, loops);
    Ok(())
}

#[test]
fn reorder_permutes_listed_positions() -> Result<()> {
    let (func, block) = matmul(64, 32, 16)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    sch.reorder(&[loops[2], loops[0]])?;

    assert_eq!(sch.get_loops(block)?, vec![loops[2], loops[1], loops[0]]);
    assert_eq!(extents(&sch, block)?, vec![16, 32, 64]);
    // Bindings follow the loops, not their positions.
    assert_eq!(sch.block(block)?.iter_vars[0].binding, lv(loops[0]));
    sch.verify()?;
    Ok(())
}

#[test]
fn reorder_across_split_tiles() -> Result<()> {
    let (func, block) = matmul(64, 64, 64)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let i = sch.split(loops[0], &[None, Some(8)])?;
    let j = sch.split(loops[1], &[None, Some(8)])?;
    sch.reorder(&[i[0], j[0], i[1], j[1]])?;
    assert_eq!(
        sch.get_loops(block)?,
        vec![i[0], j[0], i[1], j[1], loops[2]]
    );
    sch.verify()?;
    Ok(())
}

#[test]
fn loop_kinds_and_unit_loops() -> Result<()> {
    let mut fb = FuncBuilder::new("scalar");
    let out = fb.output("S", &[], DType::F32);
    let scalar = fb.block("S").store(out, vec![], Expr::Float(1.0)).finish()?;
    let (matmul_func, block) = matmul(8, 8, 8)?;

    let mut sch = Schedule::new(fb.finish(), 0);
    assert!(sch.get_loops(scalar)?.is_empty());
    let unit = sch.add_unit_loop_over_block(scalar)?;
    assert_eq!(sch.get_loops(scalar)?, vec![unit]);
    assert_eq!(sch.for_loop(unit)?.extent, 1);
    let outer = sch.add_unit_loop_over_loop(unit)?;
    assert_eq!(sch.get_loops(scalar)?, vec![outer, unit]);

    let mut sch = Schedule::new(matmul_func, 0);
    let loops = sch.get_loops(block)?;
    sch.parallel(loops[0])?;
    sch.bind(loops[1], "threadIdx.x")?;
    sch.vectorize(loops[2])?;
    assert_eq!(sch.for_loop(loops[0])?.kind, ForKind::Parallel);
    assert_eq!(
        sch.for_loop(loops[1])?.kind.thread_tag(),
        Some("threadIdx.x")
    );
    assert_eq!(sch.for_loop(loops[2])?.kind, ForKind::Vectorized);
    sch.unroll(loops[2])?;
    assert_eq!(sch.for_loop(loops[2])?.kind, ForKind::Unrolled);
    assert_eq!(sch.trace().last().map(|inst| inst.kind), Some("unroll"));

    sch.annotate_loop(loops[0], "pragma", 4i64)?;
    assert_eq!(
        sch.for_loop(loops[0])?.annotations.get("pragma"),
        Some(&AnnValue::Int(4))
    );
    Ok(())
}

#[test]
fn sampling_is_deterministic_per_seed() -> Result<()> {
    let (func, block) = matmul(128, 96, 64)?;
    let mut first = Schedule::new(func.clone(), 42);
    let mut second = Schedule::new(func, 42);
    let loops = first.get_loops(block)?;

    for loop_rv in &loops {
        let a = first.sample_perfect_tile(*loop_rv, 4, 16)?;
        let b = second.sample_perfect_tile(*loop_rv, 4, 16)?;
        assert_eq!(a, b);
        assert_eq!(a.iter().product::<i64>(), first.for_loop(*loop_rv)?.extent);
        assert!(a[3] <= 16);
    }

    let picked = first.sample_categorical(&[1, 2, 3], &[0.0, 1.0, 0.0])?;
    assert_eq!(picked, 2);
    assert!(first.sample_categorical(&[1, 2], &[1.0]).is_err());
    Ok(())
}

#[test]
fn forks_have_independent_streams() -> Result<()> {
    let (func, block) = matmul(1024, 8, 8)?;
    let mut sch = Schedule::new(func, 3);
    let loop_rv = sch.get_loops(block)?[0];
    let mut fork = sch.fork();
    assert_eq!(fork.get_loops(block)?, sch.get_loops(block)?);

    // The fork does not share the parent's position in the random stream.
    let mut parent_draws = Vec::new();
    let mut fork_draws = Vec::new();
    for _ in 0..8 {
        parent_draws.push(sch.sample_perfect_tile(loop_rv, 3, 0)?);
        fork_draws.push(fork.sample_perfect_tile(loop_rv, 3, 0)?);
    }
    assert_ne!(parent_draws, fork_draws);
    Ok(())
}
