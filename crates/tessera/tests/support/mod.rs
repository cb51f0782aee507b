#![allow(dead_code)]

use anyhow::Result;
use tessera::rule::ScheduleRule;
use tessera::tessera_tir::{iv, BlockRV, DType, Expr, FuncBuilder, PrimFunc, ReduceKind, Schedule};
use tessera::{Target, TuneContext};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn llvm_context() -> TuneContext {
    TuneContext::new().with_target(Target::llvm(4)).with_seed(7)
}

pub fn cuda_context() -> TuneContext {
    TuneContext::new()
        .with_target(Target::cuda(1024, 32))
        .with_seed(7)
}

/// Initializes `rule` with `context` and hands it back.
pub fn initialized<R: ScheduleRule>(mut rule: R, context: &TuneContext) -> Result<R> {
    rule.initialize_with_tune_context(context)?;
    Ok(rule)
}

/// C[i, j] += A[i, k] * B[k, j] in f32.
pub fn matmul(m: i64, n: i64, k: i64) -> Result<(PrimFunc, BlockRV)> {
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

/// Matmul accumulated in f32 and cast to an f16 output.
pub fn matmul_cast(m: i64, n: i64, k: i64) -> Result<(PrimFunc, BlockRV, BlockRV)> {
    let mut fb = FuncBuilder::new("matmul_cast");
    let a = fb.input("A", &[m, k], DType::F32);
    let b = fb.input("B", &[k, n], DType::F32);
    let c = fb.alloc("C", &[m, n], DType::F32);
    let d = fb.output("D", &[m, n], DType::F16);
    let gemm = fb
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
    let cast = fb
        .block("D")
        .spatial(m)
        .spatial(n)
        .store(
            d,
            vec![iv(0), iv(1)],
            Expr::cast(DType::F16, Expr::load(c, vec![iv(0), iv(1)])),
        )
        .finish()?;
    Ok((fb.finish(), gemm, cast))
}

pub struct Chain {
    pub func: PrimFunc,
    pub first: BlockRV,
    pub second: BlockRV,
    pub last: BlockRV,
}

/// B = A + 1, C = B * 2, D = C + 3 over a `rows x cols` grid.
pub fn elementwise_chain(rows: i64, cols: i64) -> Result<Chain> {
    let mut fb = FuncBuilder::new("chain");
    let a = fb.input("A", &[rows, cols], DType::F32);
    let b = fb.alloc("B", &[rows, cols], DType::F32);
    let c = fb.alloc("C", &[rows, cols], DType::F32);
    let d = fb.output("D", &[rows, cols], DType::F32);
    let first = fb
        .block("B")
        .spatial(rows)
        .spatial(cols)
        .store(
            b,
            vec![iv(0), iv(1)],
            Expr::load(a, vec![iv(0), iv(1)]) + Expr::Float(1.0),
        )
        .finish()?;
    let second = fb
        .block("C")
        .spatial(rows)
        .spatial(cols)
        .store(
            c,
            vec![iv(0), iv(1)],
            Expr::load(b, vec![iv(0), iv(1)]) * Expr::Float(2.0),
        )
        .finish()?;
    let last = fb
        .block("D")
        .spatial(rows)
        .spatial(cols)
        .store(
            d,
            vec![iv(0), iv(1)],
            Expr::load(c, vec![iv(0), iv(1)]) + Expr::Float(3.0),
        )
        .finish()?;
    Ok(Chain {
        func: fb.finish(),
        first,
        second,
        last,
    })
}

/// B[i] += A[i, k].
pub fn row_sum(rows: i64, cols: i64) -> Result<(PrimFunc, BlockRV)> {
    let mut fb = FuncBuilder::new("row_sum");
    let a = fb.input("A", &[rows, cols], DType::F32);
    let b = fb.output("B", &[rows], DType::F32);
    let block = fb
        .block("B")
        .spatial(rows)
        .reduce(cols)
        .accumulate(
            b,
            vec![iv(0)],
            ReduceKind::Sum,
            Expr::load(a, vec![iv(0), iv(1)]),
        )
        .finish()?;
    Ok((fb.finish(), block))
}

/// C[i, j] += i32(A[i, k]) * i32(B[j, k]) with u8 and i8 operands.
pub fn int8_matmul() -> Result<(PrimFunc, BlockRV)> {
    let mut fb = FuncBuilder::new("qmatmul");
    let a = fb.input("A", &[32, 64], DType::U8);
    let b = fb.input("B", &[64, 64], DType::I8);
    let c = fb.output("C", &[32, 64], DType::I32);
    let block = fb
        .block("C")
        .spatial(32)
        .spatial(64)
        .reduce(64)
        .accumulate(
            c,
            vec![iv(0), iv(1)],
            ReduceKind::Sum,
            Expr::cast(DType::I32, Expr::load(a, vec![iv(0), iv(2)]))
                * Expr::cast(DType::I32, Expr::load(b, vec![iv(1), iv(2)])),
        )
        .finish()?;
    Ok((fb.finish(), block))
}

/// Square f16 matmul accumulated in f32.
pub fn f16_matmul(n: i64) -> Result<(PrimFunc, BlockRV)> {
    let mut fb = FuncBuilder::new("hmatmul");
    let a = fb.input("A", &[n, n], DType::F16);
    let b = fb.input("B", &[n, n], DType::F16);
    let c = fb.output("C", &[n, n], DType::F32);
    let block = fb
        .block("C")
        .spatial(n)
        .spatial(n)
        .reduce(n)
        .accumulate(
            c,
            vec![iv(0), iv(1)],
            ReduceKind::Sum,
            Expr::cast(DType::F32, Expr::load(a, vec![iv(0), iv(2)]))
                * Expr::cast(DType::F32, Expr::load(b, vec![iv(2), iv(1)])),
        )
        .finish()?;
    Ok((fb.finish(), block))
}

pub struct ScalarChain {
    pub func: PrimFunc,
    pub scalar: BlockRV,
    pub producer: BlockRV,
    pub consumer: BlockRV,
}

/// c[()] = 2, B[i] = A[i] + 1, C[i] = B[i] * c[()].
pub fn scalar_constant_chain() -> Result<ScalarChain> {
    let mut fb = FuncBuilder::new("scaled");
    let a = fb.input("A", &[64], DType::F32);
    let c_scalar = fb.alloc("c", &[], DType::F32);
    let b = fb.alloc("B", &[64], DType::F32);
    let c = fb.output("C", &[64], DType::F32);
    let scalar = fb
        .block("c")
        .store(c_scalar, Vec::new(), Expr::Float(2.0))
        .finish()?;
    let producer = fb
        .block("B")
        .spatial(64)
        .store(
            b,
            vec![iv(0)],
            Expr::load(a, vec![iv(0)]) + Expr::Float(1.0),
        )
        .finish()?;
    let consumer = fb
        .block("C")
        .spatial(64)
        .store(
            c,
            vec![iv(0)],
            Expr::load(b, vec![iv(0)]) * Expr::load(c_scalar, Vec::new()),
        )
        .finish()?;
    Ok(ScalarChain {
        func: fb.finish(),
        scalar,
        producer,
        consumer,
    })
}

/// Blocks other than the root, in pre-order.
pub fn leaf_blocks(sch: &Schedule) -> Vec<BlockRV> {
    let root = sch.root_block();
    sch.blocks()
        .into_iter()
        .filter(|block| *block != root)
        .collect()
}

/// Printed form of every schedule, for comparing design spaces.
pub fn render(space: &[Schedule]) -> Vec<String> {
    space.iter().map(|sch| sch.func().to_string()).collect()
}
