//! Tensor intrinsic descriptors and the global intrinsic registry.
//!
//! An intrinsic describes a fixed-shape hardware operation (a dot product
//! instruction, a tensor-core fragment load, ...). Schedule rules look
//! intrinsics up by name and ask whether the computation of a block can be
//! mapped onto them; the [`Schedule::tensorize`] primitive only records the
//! mapping.
//!
//! Built-in intrinsics are registered through [`INTRIN_REGISTRARS`]; other
//! crates can add their own registrar to the slice or call
//! [`register_intrin`] at runtime.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::expr::{Access, BinaryOp, Expr, ReduceKind};
use crate::index::Var;
use crate::ir::{DType, IterKind};
use crate::schedule::{BlockRV, LoopRV, Schedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinRole {
    /// Initializes an accumulator fragment.
    Init,
    /// Moves an operand into intrinsic-specific storage.
    Load,
    /// The multiply-accumulate itself.
    Compute,
    /// Writes an accumulator fragment back.
    Store,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorIntrin {
    pub name: String,
    pub role: IntrinRole,
    /// Iteration space of the intrinsic, spatial dimensions first.
    pub shape: Vec<(IterKind, i64)>,
    pub a_dtype: DType,
    pub b_dtype: DType,
    pub acc_dtype: DType,
    /// Intrinsic dimensions indexing the trailing dimensions of the first
    /// operand, outermost first.
    pub a_axes: Vec<usize>,
    /// Same for the second operand.
    pub b_axes: Vec<usize>,
    /// Storage scope the intrinsic reads from or writes to.
    pub scope: String,
}

impl TensorIntrin {
    pub fn compute(
        name: impl Into<String>,
        shape: Vec<(IterKind, i64)>,
        dtypes: (DType, DType, DType),
        a_axes: Vec<usize>,
        b_axes: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            role: IntrinRole::Compute,
            shape,
            a_dtype: dtypes.0,
            b_dtype: dtypes.1,
            acc_dtype: dtypes.2,
            a_axes,
            b_axes,
            scope: "global".to_string(),
        }
    }

    /// A data-movement or initialization intrinsic over a spatial tile.
    pub fn fragment(
        name: impl Into<String>,
        role: IntrinRole,
        tile: &[i64],
        dtype: DType,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            shape: tile
                .iter()
                .map(|extent| (IterKind::Spatial, *extent))
                .collect(),
            a_dtype: dtype,
            b_dtype: dtype,
            acc_dtype: dtype,
            a_axes: Vec::new(),
            b_axes: Vec::new(),
            scope: scope.into(),
        }
    }

    /// Number of points in the iteration space.
    pub fn points(&self) -> i64 {
        self.shape.iter().map(|(_, extent)| extent).product()
    }

    /// Tries to map the computation of `block` onto this intrinsic.
    ///
    /// The block must be a sum reduction of a product of two loads (casts are
    /// ignored) with the operand and accumulator dtypes of the intrinsic. The
    /// innermost spatial and reduction iterators of the block are matched
    /// against the intrinsic dimensions, their extents must be multiples of
    /// the intrinsic extents, and the operand layouts must agree with
    /// `a_axes`/`b_axes`. On success returns, per intrinsic dimension, the
    /// loop bound to the matched iterator and the intrinsic extent.
    pub fn match_compute(&self, sch: &Schedule, block: BlockRV) -> Option<Vec<(LoopRV, i64)>> {
        if self.role != IntrinRole::Compute {
            return None;
        }
        let node = sch.block(block).ok()?;
        let store = node.store.as_ref()?;
        if store.reducer != Some(ReduceKind::Sum) {
            return None;
        }
        let Expr::Binary(BinaryOp::Mul, lhs, rhs) = store.value.strip_casts() else {
            return None;
        };
        let (Expr::Load(lhs), Expr::Load(rhs)) = (lhs.strip_casts(), rhs.strip_casts()) else {
            return None;
        };
        let func = sch.func();
        if func.buffer(store.target.buffer)?.dtype != self.acc_dtype {
            return None;
        }

        // Intrinsic dimension -> block iterator.
        let mut mapping = Vec::with_capacity(self.shape.len());
        for kind in [IterKind::Spatial, IterKind::Reduce] {
            let wanted = self.shape.iter().filter(|(k, _)| *k == kind).count();
            let available: Vec<usize> = node
                .iter_vars
                .iter()
                .enumerate()
                .filter(|(_, iv)| iv.kind == kind && iv.extent > 1)
                .map(|(i, _)| i)
                .collect();
            if available.len() < wanted {
                return None;
            }
            mapping.extend_from_slice(&available[available.len() - wanted..]);
        }
        for (dim, iter) in mapping.iter().enumerate() {
            let extent = node.iter_vars[*iter].extent;
            if self.shape[dim].0 != node.iter_vars[*iter].kind || extent % self.shape[dim].1 != 0 {
                return None;
            }
        }

        let layout_ok = |access: &Access, axes: &[usize], dtype: DType| {
            let matches_dtype = func.buffer(access.buffer).is_some_and(|b| b.dtype == dtype);
            let n = access.indices.len();
            matches_dtype
                && n >= axes.len()
                && axes.iter().enumerate().all(|(k, dim)| {
                    access.indices[n - axes.len() + k].as_var() == Some(Var::Iter(mapping[*dim]))
                })
        };
        let operands_ok = |a: &Access, b: &Access| {
            layout_ok(a, &self.a_axes, self.a_dtype) && layout_ok(b, &self.b_axes, self.b_dtype)
        };
        if !operands_ok(lhs, rhs) && !operands_ok(rhs, lhs) {
            return None;
        }

        let mut out = Vec::with_capacity(mapping.len());
        for (dim, iter) in mapping.iter().enumerate() {
            let Var::Loop(loop_rv) = node.iter_vars[*iter].binding.as_var()? else {
                return None;
            };
            out.push((loop_rv, self.shape[dim].1));
        }
        Some(out)
    }
}

/// Thread-safe map of intrinsics keyed by name.
pub struct IntrinRegistry {
    intrins: RwLock<HashMap<String, TensorIntrin>>,
}

impl IntrinRegistry {
    pub fn new() -> Self {
        Self {
            intrins: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, intrin: TensorIntrin) {
        self.intrins
            .write()
            .expect("intrinsic registry poisoned")
            .insert(intrin.name.clone(), intrin);
    }

    pub fn get(&self, name: &str) -> Option<TensorIntrin> {
        self.intrins
            .read()
            .expect("intrinsic registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.intrins
            .read()
            .expect("intrinsic registry poisoned")
            .contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .intrins
            .read()
            .expect("intrinsic registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for IntrinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Functions run once to populate the global registry.
#[linkme::distributed_slice]
pub static INTRIN_REGISTRARS: [fn(&IntrinRegistry)] = [..];

static GLOBAL_REGISTRY: OnceLock<IntrinRegistry> = OnceLock::new();

fn registry() -> &'static IntrinRegistry {
    GLOBAL_REGISTRY.get_or_init(|| {
        let registry = IntrinRegistry::new();
        for registrar in INTRIN_REGISTRARS.iter() {
            registrar(&registry);
        }
        registry
    })
}

pub fn register_intrin(intrin: TensorIntrin) {
    registry().register(intrin);
}

pub fn get_intrin(name: &str) -> Option<TensorIntrin> {
    registry().get(name)
}

pub fn has_intrin(name: &str) -> bool {
    registry().contains(name)
}

pub fn list_intrins() -> Vec<String> {
    registry().list()
}

#[linkme::distributed_slice(INTRIN_REGISTRARS)]
static REGISTER_CPU_INTRINS: fn(&IntrinRegistry) = register_cpu_intrins;

#[linkme::distributed_slice(INTRIN_REGISTRARS)]
static REGISTER_WMMA_INTRINS: fn(&IntrinRegistry) = register_wmma_intrins;

fn register_cpu_intrins(registry: &IntrinRegistry) {
    use IterKind::{Reduce as R, Spatial as S};

    // x86: 16 int32 lanes, each a 4-wide u8 x i8 dot product.
    for name in ["dot_16x4_vnni", "dot_16x4_avx512"] {
        registry.register(TensorIntrin::compute(
            name,
            vec![(S, 16), (R, 4)],
            (DType::U8, DType::I8, DType::I32),
            vec![1],
            vec![0, 1],
        ));
    }
    let arm = [
        ("dot_4x4_i8i8s32_neon", DType::I8, DType::I8, DType::I32),
        ("dot_4x4_i8i8s32_sdot", DType::I8, DType::I8, DType::I32),
        ("dot_4x4_u8u8u32_udot", DType::U8, DType::U8, DType::U32),
        ("dot_4x4_u8u8i32_hdot", DType::U8, DType::U8, DType::I32),
    ];
    for (name, a, b, acc) in arm {
        registry.register(TensorIntrin::compute(
            name,
            vec![(S, 4), (R, 4)],
            (a, b, acc),
            vec![1],
            vec![0, 1],
        ));
    }
    for (name, b) in [
        ("dot_32x4_u8u8i32_vrmpy", DType::U8),
        ("dot_32x4_u8i8i32_vrmpy", DType::I8),
    ] {
        registry.register(TensorIntrin::compute(
            name,
            vec![(S, 32), (R, 4)],
            (DType::U8, b, DType::I32),
            vec![1],
            vec![0, 1],
        ));
    }
}

fn register_wmma_intrins(registry: &IntrinRegistry) {
    use IterKind::{Reduce as R, Spatial as S};

    let families = [
        ("f16", "f32", DType::F16, DType::F32),
        ("f16", "f16", DType::F16, DType::F16),
        ("s8", "s32", DType::I8, DType::I32),
    ];
    for (input, acc, in_dtype, acc_dtype) in families {
        registry.register(TensorIntrin::fragment(
            format!("wmma_fill_16x16x16_{acc}"),
            IntrinRole::Init,
            &[16, 16],
            acc_dtype,
            "wmma.accumulator",
        ));
        registry.register(TensorIntrin::fragment(
            format!("wmma_store_16x16x16_{acc}_shared_dyn"),
            IntrinRole::Store,
            &[16, 16],
            acc_dtype,
            "shared.dyn",
        ));
        for operand in ["a", "b", "b_trans"] {
            registry.register(TensorIntrin::fragment(
                format!("wmma_load_16x16x16_{input}_{operand}_shared_dyn"),
                IntrinRole::Load,
                &[16, 16],
                in_dtype,
                "shared.dyn",
            ));
        }
        for (suffix, b_axes) in [("", vec![2, 1]), ("_trans", vec![1, 2])] {
            let mut sync = TensorIntrin::compute(
                format!("wmma_sync_16x16x16_{input}{input}{acc}{suffix}"),
                vec![(S, 16), (S, 16), (R, 16)],
                (in_dtype, in_dtype, acc_dtype),
                vec![0, 2],
                b_axes,
            );
            sync.scope = "wmma.accumulator".to_string();
            registry.register(sync);
        }
    }
}
