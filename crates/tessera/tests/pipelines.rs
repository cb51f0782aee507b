mod support;

use std::sync::Arc;

use anyhow::Result;
use tessera::attr;
use tessera::rule::{
    AutoInline, IntrinGroup, MultiLevelTiling, MultiLevelTilingTensorCore,
    MultiLevelTilingWideVector, ReuseConfig, ReuseType,
};
use tessera::tessera_tir::{AnnValue, BlockRV, Schedule};
use tessera::{
    default_arm, default_cuda, default_cuda_tensor_core, default_hexagon, default_llvm,
    default_micro, default_rules, default_x86, BlockFilter, PostOrderApply, RuleError, RuleList,
    Target, TuneContext,
};

use support::{
    elementwise_chain, init_logging, leaf_blocks, llvm_context, matmul, matmul_cast, render,
};

fn names(rules: &RuleList) -> Vec<String> {
    rules
        .iter()
        .map(|rule| {
            let text = rule.to_string();
            text.split('(').next().unwrap_or_default().to_string()
        })
        .collect()
}

const HEAD: [&str; 3] = ["ApplyCustomRule", "InlineConstantScalars", "AutoInline"];

fn expected(tail: &[&str]) -> Vec<String> {
    HEAD.iter().chain(tail).map(ToString::to_string).collect()
}

#[test]
fn cpu_pipelines_keep_their_order() -> Result<()> {
    assert_eq!(
        names(&default_llvm()?),
        expected(&[
            "AddRFactor",
            "MultiLevelTiling",
            "ParallelizeVectorizeUnroll",
            "RandomComputeLocation",
        ])
    );
    assert_eq!(
        names(&default_x86("vnni")?),
        expected(&[
            "AddRFactor",
            "MultiLevelTilingWithIntrin",
            "MultiLevelTiling",
            "ParallelizeVectorizeUnroll",
            "RandomComputeLocation",
        ])
    );
    assert_eq!(
        names(&default_arm("dotprod")?),
        expected(&[
            "AddRFactor",
            "MultiLevelTilingWithIntrin",
            "MultiLevelTilingWithIntrin",
            "MultiLevelTilingWithIntrin",
            "MultiLevelTiling",
            "ParallelizeVectorizeUnroll",
            "RandomComputeLocation",
        ])
    );
    assert_eq!(names(&default_micro()?), expected(&["MultiLevelTiling"]));
    assert_eq!(
        names(&default_hexagon()?),
        expected(&["MultiLevelTilingWideVector", "ParallelizeVectorizeUnroll"])
    );
    Ok(())
}

#[test]
fn gpu_pipelines_keep_their_order() -> Result<()> {
    let cuda = [
        "MultiLevelTiling",
        "CrossThreadReduction",
        "ParallelizeVectorizeUnroll",
        "AutoBind",
    ];
    assert_eq!(names(&default_cuda()?), expected(&cuda));

    let mut tensor_core = vec!["MultiLevelTilingTensorCore"];
    tensor_core.extend(cuda);
    assert_eq!(names(&default_cuda_tensor_core()?), expected(&tensor_core));
    Ok(())
}

#[test]
fn family_names_dispatch_to_pipelines() -> Result<()> {
    assert_eq!(names(&default_rules("llvm")?), names(&default_llvm()?));
    assert_eq!(names(&default_rules("c")?), names(&default_micro()?));
    assert_eq!(
        names(&default_rules("avx512")?),
        names(&default_x86("avx512")?)
    );
    assert_eq!(
        names(&default_rules("neon")?).len(),
        names(&default_rules("arm")?).len() + 1
    );
    assert_eq!(
        default_rules("vulkan").err(),
        Some(RuleError::UnknownTargetFamily("vulkan".to_string()))
    );
    assert_eq!(
        default_x86("sse2").err(),
        Some(RuleError::UnknownIsa("sse2".to_string()))
    );
    Ok(())
}

#[test]
fn tiling_configuration_is_validated() {
    assert!(matches!(
        MultiLevelTiling::new("SSXRS", None, None, None, None, None),
        Err(RuleError::InvalidStructure { .. })
    ));
    assert!(matches!(
        MultiLevelTiling::new("RR", None, None, None, None, None),
        Err(RuleError::InvalidStructure { .. })
    ));

    let may_read = ReuseConfig::may(&[1], "shared").ok();
    assert!(matches!(
        MultiLevelTiling::new("SSRSRS", None, None, None, may_read, None),
        Err(RuleError::InvalidReuse(_))
    ));
    let deep_write = ReuseConfig::may(&[7], "global").ok();
    assert!(matches!(
        MultiLevelTiling::new("SSRSRS", None, None, None, None, deep_write),
        Err(RuleError::InvalidReuse(_))
    ));
    assert!(matches!(
        MultiLevelTiling::new("SSRSRS", None, None, Some(&[4, 0][..]), None, None),
        Err(RuleError::InvalidConfig(_))
    ));
    assert!(matches!(
        ReuseConfig::must(&[], "shared"),
        Err(RuleError::InvalidReuse(_))
    ));

    assert!(matches!(
        MultiLevelTilingTensorCore::new(
            Vec::new(),
            "SSSRRSRS",
            None,
            None,
            None,
            None,
            None,
            false,
        ),
        Err(RuleError::InvalidConfig(_))
    ));
    assert!(matches!(
        MultiLevelTilingWideVector::new("SRSRS", 0, None, None, None),
        Err(RuleError::InvalidConfig(_))
    ));
}

#[test]
fn configurations_parse_from_json() -> Result<()> {
    let target = Target::from_json(r#"{"kind": "cuda", "max_threads_per_block": 1024}"#)?;
    assert_eq!(target.keys, vec!["cuda".to_string()]);
    assert_eq!(target.require_max_threads_per_block()?, 1024);
    assert!(target.require_thread_warp_size().is_err());

    let reuse = ReuseConfig::from_json(r#"{"req": "must", "levels": [4], "scope": "shared"}"#)?;
    assert_eq!(reuse, ReuseConfig::must(&[4], "shared")?);
    assert_eq!(reuse.req, ReuseType::Must);
    assert!(ReuseConfig::from_json(r#"{"req": "may", "levels": []}"#).is_err());

    let group = IntrinGroup::from_json(
        r#"{
            "init": "wmma_fill_16x16x16_f32",
            "load_a": "wmma_load_16x16x16_f16_a_shared_dyn",
            "load_b": "wmma_load_16x16x16_f16_b_shared_dyn",
            "compute": "wmma_sync_16x16x16_f16f16f32",
            "store": "wmma_store_16x16x16_f32_shared_dyn"
        }"#,
    )?;
    assert_eq!(group, IntrinGroup::wmma("f16", "f32", false));
    Ok(())
}

#[test]
fn default_llvm_space_is_deterministic() -> Result<()> {
    init_logging();
    let generate = || -> Result<Vec<String>> {
        let (func, _, _) = matmul_cast(64, 64, 64)?;
        let mut space = PostOrderApply::new(default_llvm()?);
        space.initialize_with_tune_context(&llvm_context())?;
        Ok(render(&space.generate_design_space(Schedule::new(func, 42))))
    };
    let first = generate()?;
    assert!(first.len() > 1, "tiling choices fan out");
    assert_eq!(first, generate()?);
    Ok(())
}

fn lowering_rule(rules: &RuleList) -> Option<String> {
    rules
        .iter()
        .map(|rule| rule.to_string())
        .find(|text| text.starts_with("ParallelizeVectorizeUnroll"))
}

#[test]
fn cpu_vectorize_extent_is_its_own_setting() -> Result<()> {
    let llvm = lowering_rule(&default_llvm()?).unwrap_or_default();
    assert!(llvm.contains("max_jobs_per_core=16"), "{llvm}");
    assert!(llvm.contains("max_vectorize_extent=64"), "{llvm}");
    let arm = lowering_rule(&default_arm("")?).unwrap_or_default();
    assert!(arm.contains("max_jobs_per_core=8"), "{arm}");
    assert!(arm.contains("max_vectorize_extent=32"), "{arm}");
    let hexagon = lowering_rule(&default_hexagon()?).unwrap_or_default();
    assert!(hexagon.contains("max_vectorize_extent=128"), "{hexagon}");
    Ok(())
}

#[test]
fn hexagon_and_micro_spaces_generate() -> Result<()> {
    init_logging();
    let cases = [
        (default_hexagon()?, Target::hexagon(4), "SRSRS"),
        (default_micro()?, Target::micro(), "SSRSRS"),
    ];
    for (rules, target, structure) in cases {
        let (func, block) = matmul(128, 128, 64)?;
        let mut space = PostOrderApply::new(rules);
        space.initialize_with_tune_context(&TuneContext::new().with_target(target).with_seed(3))?;
        let schedules = space.generate_design_space(Schedule::new(func, 3));
        assert!(!schedules.is_empty());
        for sch in &schedules {
            assert_eq!(
                sch.block_annotation(block, attr::TILING_STRUCTURE),
                Some(&AnnValue::from(structure))
            );
            sch.verify()?;
        }
    }
    Ok(())
}

#[test]
fn block_filter_limits_visited_blocks() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let first = chain.first;
    let keep: BlockFilter = Arc::new(move |_: &Schedule, block: BlockRV| block == first);

    let rules: RuleList = vec![Box::new(AutoInline::cpu())];
    let mut space = PostOrderApply::new(rules).with_block_filter(keep);
    space.initialize_with_tune_context(&llvm_context())?;
    assert_eq!(space.rules().len(), 1);

    let schedules = space.generate_design_space(Schedule::new(chain.func, 0));
    assert_eq!(schedules.len(), 1);
    assert_eq!(leaf_blocks(&schedules[0]), vec![chain.second, chain.last]);
    Ok(())
}
