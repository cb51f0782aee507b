use anyhow::Result;
use tessera_tir::intrin::{get_intrin, has_intrin, list_intrins, register_intrin};
use tessera_tir::{
    iv, AnnValue, BlockRV, DType, Expr, FuncBuilder, IterKind, PrimFunc, ReduceKind, Schedule,
    ScheduleError, TensorIntrin,
};

fn int8_matmul(a_dtype: DType, b_dtype: DType) -> Result<(PrimFunc, BlockRV)> {
    let mut fb = FuncBuilder::new("qmatmul");
    let a = fb.input("A", &[32, 64], a_dtype);
    let b = fb.input("B", &[64, 64], b_dtype);
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

#[test]
fn builtin_intrinsics_are_registered() {
    for name in [
        "dot_16x4_vnni",
        "dot_16x4_avx512",
        "dot_4x4_i8i8s32_neon",
        "dot_4x4_i8i8s32_sdot",
        "dot_4x4_u8u8u32_udot",
        "dot_4x4_u8u8i32_hdot",
        "dot_32x4_u8u8i32_vrmpy",
        "wmma_fill_16x16x16_f32",
        "wmma_load_16x16x16_f16_a_shared_dyn",
        "wmma_load_16x16x16_f16_b_trans_shared_dyn",
        "wmma_sync_16x16x16_f16f16f32",
        "wmma_sync_16x16x16_s8s8s32_trans",
        "wmma_store_16x16x16_f32_shared_dyn",
    ] {
        assert!(has_intrin(name), "{name} should be registered");
    }
    assert!(list_intrins().windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn vnni_matches_u8_i8_matmul() -> Result<()> {
    let (func, block) = int8_matmul(DType::U8, DType::I8)?;
    let sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let vnni = get_intrin("dot_16x4_vnni").expect("builtin");

    let mapping = vnni.match_compute(&sch, block).expect("vnni applies");
    assert_eq!(mapping, vec![(loops[1], 16), (loops[2], 4)]);
    Ok(())
}

#[test]
fn intrinsic_rejects_wrong_dtypes() -> Result<()> {
    let (func, block) = int8_matmul(DType::I8, DType::I8)?;
    let sch = Schedule::new(func, 0);
    let vnni = get_intrin("dot_16x4_vnni").expect("builtin");
    assert!(vnni.match_compute(&sch, block).is_none());
    let sdot = get_intrin("dot_4x4_i8i8s32_sdot").expect("builtin");
    assert!(sdot.match_compute(&sch, block).is_some());
    Ok(())
}

#[test]
fn tensorize_checks_iteration_space() -> Result<()> {
    register_intrin(TensorIntrin::compute(
        "test_dot_4x4",
        vec![(IterKind::Spatial, 4), (IterKind::Reduce, 4)],
        (DType::I8, DType::I8, DType::I32),
        vec![1],
        vec![0, 1],
    ));
    let (func, block) = int8_matmul(DType::I8, DType::I8)?;
    let mut sch = Schedule::new(func, 0);
    let loops = sch.get_loops(block)?;
    let j = sch.split(loops[1], &[None, Some(4)])?;
    let k = sch.split(loops[2], &[None, Some(4)])?;
    sch.reorder(&[k[0], j[1]])?;
    assert_eq!(
        sch.get_loops(block)?,
        vec![loops[0], j[0], k[0], j[1], k[1]]
    );

    let err = sch
        .tensorize(j[0], "test_dot_4x4")
        .expect_err("too many points");
    assert!(matches!(err, ScheduleError::CannotTensorize { .. }));
    let err = sch.tensorize(j[1], "missing_intrin").expect_err("unknown");
    assert!(matches!(err, ScheduleError::UnknownIntrin(_)));

    sch.tensorize(j[1], "test_dot_4x4")?;
    assert_eq!(
        sch.for_loop(j[1])?.annotations.get("tensorize_intrin"),
        Some(&AnnValue::from("test_dot_4x4"))
    );
    Ok(())
}
