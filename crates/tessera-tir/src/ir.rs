use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{Access, Store};
use crate::index::IndexExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk{}", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    I32,
    U32,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    pub fn bits(self) -> u32 {
        match self {
            DType::Bool => 1,
            DType::I8 | DType::U8 => 8,
            DType::I16 | DType::F16 => 16,
            DType::I32 | DType::U32 | DType::F32 => 32,
            DType::I64 | DType::F64 => 64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::U32 => "uint32",
            DType::I64 => "int64",
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: DType,
    /// Storage scope such as `global`, `shared` or `local`.
    pub scope: String,
}

impl Buffer {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterKind {
    Spatial,
    Reduce,
}

impl IterKind {
    pub fn letter(self) -> char {
        match self {
            IterKind::Spatial => 'S',
            IterKind::Reduce => 'R',
        }
    }
}

/// A block iterator together with the loop expression it is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct IterVar {
    pub kind: IterKind,
    pub extent: i64,
    pub binding: IndexExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForKind {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
    /// Bound to a thread axis such as `blockIdx.x` or `threadIdx.x`.
    ThreadBinding(String),
}

impl ForKind {
    pub fn thread_tag(&self) -> Option<&str> {
        match self {
            ForKind::ThreadBinding(tag) => Some(tag),
            _ => None,
        }
    }
}

/// Annotation payload attached to blocks and loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
}

impl AnnValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AnnValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AnnValue::Ints(values) => Some(values),
            _ => None,
        }
    }
}

impl From<i64> for AnnValue {
    fn from(value: i64) -> Self {
        AnnValue::Int(value)
    }
}

impl From<&str> for AnnValue {
    fn from(value: &str) -> Self {
        AnnValue::Str(value.to_string())
    }
}

impl From<String> for AnnValue {
    fn from(value: String) -> Self {
        AnnValue::Str(value)
    }
}

impl From<Vec<i64>> for AnnValue {
    fn from(values: Vec<i64>) -> Self {
        AnnValue::Ints(values)
    }
}

impl fmt::Display for AnnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnValue::Int(value) => write!(f, "{value}"),
            AnnValue::Float(value) => write!(f, "{value}"),
            AnnValue::Str(value) => write!(f, "{value:?}"),
            AnnValue::Ints(values) => write!(f, "{values:?}"),
        }
    }
}

pub type Annotations = BTreeMap<String, AnnValue>;

/// Guard `expr < bound` over loop variables, introduced by imperfect splits.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub expr: IndexExpr,
    pub bound: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub iter_vars: Vec<IterVar>,
    /// `None` only for the root block.
    pub store: Option<Store>,
    pub predicates: Vec<Predicate>,
    pub annotations: Annotations,
    /// Top-level statements; only the root block has children.
    pub children: Vec<Stmt>,
}

impl Block {
    pub fn is_leaf(&self) -> bool {
        self.store.is_some() && self.children.is_empty()
    }

    pub fn write_buffer(&self) -> Option<BufferId> {
        self.store.as_ref().map(|store| store.target.buffer)
    }

    /// Distinct buffers read by the block, in first-use order.
    pub fn read_buffers(&self) -> Vec<BufferId> {
        let mut out: Vec<BufferId> = Vec::new();
        if let Some(store) = &self.store {
            store.value.for_each_load(&mut |access| {
                if !out.contains(&access.buffer) {
                    out.push(access.buffer);
                }
            });
        }
        out
    }

    pub fn loads_of(&self, buffer: BufferId) -> Vec<&Access> {
        match &self.store {
            Some(store) => store
                .value
                .loads()
                .into_iter()
                .filter(|access| access.buffer == buffer)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_spatial(&self) -> bool {
        self.iter_vars.iter().all(|iv| iv.kind == IterKind::Spatial)
            && matches!(&self.store, Some(store) if store.reducer.is_none())
    }

    pub fn is_reduction(&self) -> bool {
        matches!(&self.store, Some(store) if store.reducer.is_some())
            && self.iter_vars.iter().any(|iv| iv.kind == IterKind::Reduce)
    }

    pub fn annotation(&self, key: &str) -> Option<&AnnValue> {
        self.annotations.get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub id: LoopId,
    pub extent: i64,
    pub kind: ForKind,
    pub annotations: Annotations,
    pub body: Vec<Stmt>,
}

impl Loop {
    pub fn new(id: LoopId, extent: i64, body: Vec<Stmt>) -> Self {
        Self {
            id,
            extent,
            kind: ForKind::Serial,
            annotations: Annotations::new(),
            body,
        }
    }

    /// The single nested loop when the body is exactly one loop.
    pub fn only_child_loop(&self) -> Option<&Loop> {
        match self.body.as_slice() {
            [Stmt::Loop(child)] => Some(child),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Loop(Loop),
    Block(Block),
}

impl Stmt {
    /// Visits every block in pre-order.
    pub fn for_each_block<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Block),
    {
        match self {
            Stmt::Block(block) => {
                f(block);
                for child in &block.children {
                    child.for_each_block(f);
                }
            }
            Stmt::Loop(lp) => {
                for child in &lp.body {
                    child.for_each_block(f);
                }
            }
        }
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        let mut found = false;
        self.for_each_block(&mut |block| found |= block.id == id);
        found
    }

    pub fn blocks(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        self.for_each_block(&mut |block| out.push(block.id));
        out
    }
}

/// Position of a statement: child indices starting from the root block's
/// children and descending through loop bodies.
pub type StmtPath = Vec<usize>;

/// A function body: buffers, parameters and the root block.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimFunc {
    pub name: String,
    pub buffers: BTreeMap<BufferId, Buffer>,
    /// Buffers passed in or out of the function, in signature order.
    pub params: Vec<BufferId>,
    pub root: Block,
    next_block: u32,
    next_loop: u32,
    next_buffer: u32,
}

impl PrimFunc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffers: BTreeMap::new(),
            params: Vec::new(),
            root: Block {
                id: BlockId(0),
                name: "root".to_string(),
                iter_vars: Vec::new(),
                store: None,
                predicates: Vec::new(),
                annotations: Annotations::new(),
                children: Vec::new(),
            },
            next_block: 1,
            next_loop: 0,
            next_buffer: 0,
        }
    }

    pub fn fresh_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn fresh_loop_id(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, buffer);
        id
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    pub fn is_param(&self, id: BufferId) -> bool {
        self.params.contains(&id)
    }

    /// Picks a buffer name that is not used yet.
    pub fn unique_buffer_name(&self, base: &str) -> String {
        let taken = |name: &str| self.buffers.values().any(|buffer| buffer.name == name);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn unique_block_name(&self, base: &str) -> String {
        let mut names: Vec<&str> = Vec::new();
        for child in &self.root.children {
            child.for_each_block(&mut |block| names.push(&block.name));
        }
        if !names.contains(&base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|name| !names.contains(&name.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// All blocks in pre-order, starting with the root block.
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut out = vec![self.root.id];
        for child in &self.root.children {
            child.for_each_block(&mut |block| out.push(block.id));
        }
        out
    }

    pub fn leaf_blocks(&self) -> Vec<&Block> {
        let mut out = Vec::new();
        for child in &self.root.children {
            child.for_each_block(&mut |block| {
                if block.is_leaf() {
                    out.push(block);
                }
            });
        }
        out
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        if id == self.root.id {
            return Some(&self.root);
        }
        let path = self.locate_block(id)?;
        match self.stmt(&path)? {
            Stmt::Block(block) => Some(block),
            Stmt::Loop(_) => None,
        }
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        if id == self.root.id {
            return Some(&mut self.root);
        }
        let path = self.locate_block(id)?;
        match self.stmt_mut(&path)? {
            Stmt::Block(block) => Some(block),
            Stmt::Loop(_) => None,
        }
    }

    pub fn for_loop(&self, id: LoopId) -> Option<&Loop> {
        let path = self.locate_loop(id)?;
        match self.stmt(&path)? {
            Stmt::Loop(lp) => Some(lp),
            Stmt::Block(_) => None,
        }
    }

    pub fn for_loop_mut(&mut self, id: LoopId) -> Option<&mut Loop> {
        let path = self.locate_loop(id)?;
        match self.stmt_mut(&path)? {
            Stmt::Loop(lp) => Some(lp),
            Stmt::Block(_) => None,
        }
    }

    pub fn locate_block(&self, id: BlockId) -> Option<StmtPath> {
        locate(&self.root.children, &mut |stmt| {
            matches!(stmt, Stmt::Block(block) if block.id == id)
        })
    }

    pub fn locate_loop(&self, id: LoopId) -> Option<StmtPath> {
        locate(&self.root.children, &mut |stmt| {
            matches!(stmt, Stmt::Loop(lp) if lp.id == id)
        })
    }

    pub fn stmt(&self, path: &[usize]) -> Option<&Stmt> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.children.get(*first)?;
        for index in rest {
            current = match current {
                Stmt::Loop(lp) => lp.body.get(*index)?,
                Stmt::Block(_) => return None,
            };
        }
        Some(current)
    }

    pub fn stmt_mut(&mut self, path: &[usize]) -> Option<&mut Stmt> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.children.get_mut(*first)?;
        for index in rest {
            current = match current {
                Stmt::Loop(lp) => lp.body.get_mut(*index)?,
                Stmt::Block(_) => return None,
            };
        }
        Some(current)
    }

    /// The statement list that contains the statement at `path`.
    pub fn siblings_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Stmt>> {
        let (_, parent) = path.split_last()?;
        if parent.is_empty() {
            return Some(&mut self.root.children);
        }
        match self.stmt_mut(parent)? {
            Stmt::Loop(lp) => Some(&mut lp.body),
            Stmt::Block(_) => None,
        }
    }

    /// Loops enclosing the statement at `path`, outermost first.
    pub fn loops_on_path(&self, path: &[usize]) -> Vec<LoopId> {
        let mut out = Vec::new();
        for depth in 1..path.len() {
            if let Some(Stmt::Loop(lp)) = self.stmt(&path[..depth]) {
                out.push(lp.id);
            }
        }
        out
    }

    /// Removes the statement at `path` together with every enclosing loop
    /// that becomes empty.
    pub fn remove_stmt(&mut self, path: &[usize]) -> Option<Stmt> {
        let index = *path.last()?;
        let siblings = self.siblings_mut(path)?;
        if index >= siblings.len() {
            return None;
        }
        let removed = siblings.remove(index);
        let mut parent = path[..path.len() - 1].to_vec();
        while !parent.is_empty() {
            let empty = matches!(self.stmt(&parent), Some(Stmt::Loop(lp)) if lp.body.is_empty());
            if !empty {
                break;
            }
            let index = *parent.last()?;
            self.siblings_mut(&parent)?.remove(index);
            parent.pop();
        }
        Some(removed)
    }

    /// Inclusive range of every loop variable, for index simplification.
    pub fn loop_ranges(&self) -> BTreeMap<LoopId, (i64, i64)> {
        fn walk(stmts: &[Stmt], out: &mut BTreeMap<LoopId, (i64, i64)>) {
            for stmt in stmts {
                if let Stmt::Loop(lp) = stmt {
                    out.insert(lp.id, (0, lp.extent - 1));
                    walk(&lp.body, out);
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(&self.root.children, &mut out);
        out
    }

    /// Blocks that write `buffer`, in pre-order.
    pub fn writers_of(&self, buffer: BufferId) -> Vec<BlockId> {
        self.leaf_blocks()
            .into_iter()
            .filter(|block| block.write_buffer() == Some(buffer))
            .map(|block| block.id)
            .collect()
    }

    /// Blocks that read `buffer`, in pre-order.
    pub fn readers_of(&self, buffer: BufferId) -> Vec<BlockId> {
        self.leaf_blocks()
            .into_iter()
            .filter(|block| block.read_buffers().contains(&buffer))
            .map(|block| block.id)
            .collect()
    }
}

fn locate<F>(stmts: &[Stmt], pred: &mut F) -> Option<StmtPath>
where
    F: FnMut(&Stmt) -> bool,
{
    for (index, stmt) in stmts.iter().enumerate() {
        if pred(stmt) {
            return Some(vec![index]);
        }
        if let Stmt::Loop(lp) = stmt {
            if let Some(mut rest) = locate(&lp.body, pred) {
                rest.insert(0, index);
                return Some(rest);
            }
        }
    }
    None
}
