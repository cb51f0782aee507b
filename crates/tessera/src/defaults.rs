//! Default rule pipelines for the supported target families.
//!
//! Every function returns freshly constructed rules; callers initialize them
//! with a [`crate::TuneContext`] before use.

use crate::error::{RuleError, RuleResult};
use crate::pipeline::{assemble, RulePipelineBuilder, TargetRules};
use crate::rule::{
    AddRFactor, AutoBind, AutoInline, CrossThreadReduction, IntrinGroup, MultiLevelTiling,
    MultiLevelTilingTensorCore, MultiLevelTilingWideVector, MultiLevelTilingWithIntrin,
    ParallelizeVectorizeUnroll, RandomComputeLocation, ReuseConfig, ScheduleRule,
};

pub type RuleList = Vec<Box<dyn ScheduleRule>>;

fn cpu_write_reuse() -> RuleResult<ReuseConfig> {
    ReuseConfig::may(&[1, 2], "global")
}

fn cpu_tiling(max_innermost_factor: i64) -> RuleResult<MultiLevelTiling> {
    MultiLevelTiling::new(
        "SSRSRS",
        None,
        Some(max_innermost_factor),
        None,
        None,
        Some(cpu_write_reuse()?),
    )
}

fn cpu_intrin_tiling(
    intrin: &str,
    max_innermost_factor: i64,
) -> RuleResult<MultiLevelTilingWithIntrin> {
    MultiLevelTilingWithIntrin::new(
        intrin,
        "SSRSRS",
        None,
        Some(max_innermost_factor),
        None,
        None,
        Some(cpu_write_reuse()?),
    )
}

/// Generic CPUs, optionally with a dot-product intrinsic.
struct CpuRules {
    intrins: Vec<&'static str>,
    max_jobs_per_core: i64,
    max_innermost_factor: i64,
    max_vectorize_extent: i64,
    unroll_max_steps: &'static [i64],
}

impl CpuRules {
    fn llvm(intrins: Vec<&'static str>) -> Self {
        Self {
            intrins,
            max_jobs_per_core: 16,
            max_innermost_factor: 64,
            max_vectorize_extent: 64,
            unroll_max_steps: &[0, 16, 64, 512],
        }
    }

    fn arm(intrins: Vec<&'static str>) -> Self {
        Self {
            intrins,
            max_jobs_per_core: 8,
            max_innermost_factor: 32,
            max_vectorize_extent: 32,
            unroll_max_steps: &[0, 8, 32, 256],
        }
    }
}

impl TargetRules for CpuRules {
    fn populate_inline(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(AutoInline::cpu());
        Ok(())
    }

    fn populate_reduction(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(AddRFactor::new(self.max_jobs_per_core, Some(self.max_innermost_factor)));
        Ok(())
    }

    fn populate_tiling(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        for intrin in &self.intrins {
            p.rule(cpu_intrin_tiling(intrin, self.max_innermost_factor)?);
        }
        p.rule(cpu_tiling(self.max_innermost_factor)?);
        Ok(())
    }

    fn populate_lowering(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(ParallelizeVectorizeUnroll::new(
            self.max_jobs_per_core,
            self.max_vectorize_extent,
            self.unroll_max_steps,
            true,
        ));
        p.rule(RandomComputeLocation::new());
        Ok(())
    }
}

struct MicroRules;

impl TargetRules for MicroRules {
    fn populate_inline(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(AutoInline::cpu());
        Ok(())
    }

    fn populate_tiling(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(cpu_tiling(64)?);
        Ok(())
    }
}

struct HexagonRules;

impl TargetRules for HexagonRules {
    fn populate_inline(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(AutoInline::cpu());
        Ok(())
    }

    fn populate_tiling(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(MultiLevelTilingWideVector::new(
            "SRSRS",
            1024,
            Some(128),
            None,
            Some(cpu_write_reuse()?),
        )?);
        Ok(())
    }

    fn populate_lowering(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(ParallelizeVectorizeUnroll::new(16, 128, &[0, 16, 64, 512], true));
        Ok(())
    }
}

struct CudaRules {
    tensor_core: bool,
}

const VECTOR_LOAD_LENS: [i64; 6] = [1, 2, 3, 4, 8, 16];

impl CudaRules {
    fn tensor_core_tiling() -> RuleResult<MultiLevelTilingTensorCore> {
        let groups = [("f16", "f32"), ("f16", "f16"), ("s8", "s32")]
            .into_iter()
            .flat_map(|(input, output)| {
                [false, true]
                    .into_iter()
                    .map(move |trans_b| IntrinGroup::wmma(input, output, trans_b))
            })
            .collect();
        MultiLevelTilingTensorCore::new(
            groups,
            "SSSRRSRS",
            Some(&["blockIdx.y", "blockIdx.x", "threadIdx.y"][..]),
            Some(4),
            Some(&VECTOR_LOAD_LENS[..]),
            Some(ReuseConfig::must(&[4], "shared.dyn")?),
            Some(ReuseConfig::must(&[2], "shared.dyn")?),
            false,
        )
    }
}

impl TargetRules for CudaRules {
    fn populate_inline(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(AutoInline::gpu());
        Ok(())
    }

    fn populate_tiling(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        if self.tensor_core {
            p.rule(Self::tensor_core_tiling()?);
        }
        p.rule(MultiLevelTiling::new(
            "SSSRRSRS",
            Some(&["blockIdx.x", "vthread.x", "threadIdx.x"][..]),
            Some(64),
            Some(&VECTOR_LOAD_LENS[..]),
            Some(ReuseConfig::must(&[4], "shared")?),
            Some(ReuseConfig::must(&[3], "local")?),
        )?);
        p.rule(CrossThreadReduction::new(&[4, 8, 16, 32, 64, 128, 256, 512])?);
        Ok(())
    }

    fn populate_lowering(&self, p: &mut RulePipelineBuilder) -> RuleResult<()> {
        p.rule(ParallelizeVectorizeUnroll::new(-1, -1, &[0, 16, 64, 512, 1024], true));
        p.rule(AutoBind::new(256, &[32, 64, 128, 256, 512, 1024], -1)?);
        Ok(())
    }
}

pub fn default_llvm() -> RuleResult<RuleList> {
    assemble(&CpuRules::llvm(Vec::new()))
}

/// LLVM rules plus tiling onto the `"vnni"` or `"avx512"` dot product.
pub fn default_x86(isa: &str) -> RuleResult<RuleList> {
    let intrin = match isa {
        "vnni" => "dot_16x4_vnni",
        "avx512" => "dot_16x4_avx512",
        other => return Err(RuleError::UnknownIsa(other.to_string())),
    };
    assemble(&CpuRules::llvm(vec![intrin]))
}

pub fn default_cuda() -> RuleResult<RuleList> {
    assemble(&CudaRules { tensor_core: false })
}

pub fn default_cuda_tensor_core() -> RuleResult<RuleList> {
    assemble(&CudaRules { tensor_core: true })
}

pub fn default_hexagon() -> RuleResult<RuleList> {
    assemble(&HexagonRules)
}

pub fn default_micro() -> RuleResult<RuleList> {
    assemble(&MicroRules)
}

/// ARM rules; `"neon"` and `"dotprod"` add tiling onto the matching dot
/// product intrinsics, other ISA strings add none.
pub fn default_arm(isa: &str) -> RuleResult<RuleList> {
    let intrins = match isa {
        "neon" => vec!["dot_4x4_i8i8s32_neon"],
        "dotprod" => vec![
            "dot_4x4_i8i8s32_sdot",
            "dot_4x4_u8u8u32_udot",
            "dot_4x4_u8u8i32_hdot",
        ],
        _ => Vec::new(),
    };
    assemble(&CpuRules::arm(intrins))
}

/// Dispatches on a target family name.
pub fn default_rules(family: &str) -> RuleResult<RuleList> {
    match family {
        "llvm" => default_llvm(),
        "c" | "micro" => default_micro(),
        "vnni" | "avx512" => default_x86(family),
        "cuda" => default_cuda(),
        "cuda-tensorcore" => default_cuda_tensor_core(),
        "hexagon" => default_hexagon(),
        "arm" => default_arm(""),
        "neon" | "dotprod" => default_arm(family),
        other => Err(RuleError::UnknownTargetFamily(other.to_string())),
    }
}
