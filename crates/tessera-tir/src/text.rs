use std::fmt::{self, Write};

use crate::ir::{Block, ForKind, PrimFunc, Stmt};

impl fmt::Display for PrimFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} {{", self.name)?;
        for (id, buffer) in &self.buffers {
            let role = if self.is_param(*id) { "param" } else { "alloc" };
            writeln!(
                f,
                "  {role} {id} {}: {}{:?} @{}",
                buffer.name, buffer.dtype, buffer.shape, buffer.scope
            )?;
        }
        for stmt in &self.root.children {
            write_stmt(f, stmt, 1)?;
        }
        writeln!(f, "}}")
    }
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match stmt {
        Stmt::Loop(lp) => {
            let kind = match &lp.kind {
                ForKind::Serial => String::new(),
                ForKind::Parallel => " parallel".to_string(),
                ForKind::Vectorized => " vectorized".to_string(),
                ForKind::Unrolled => " unrolled".to_string(),
                ForKind::ThreadBinding(tag) => format!(" bind({tag})"),
            };
            writeln!(
                f,
                "{pad}for {} in 0..{}{kind}{} {{",
                lp.id,
                lp.extent,
                annotations(&lp.annotations)
            )?;
            for child in &lp.body {
                write_stmt(f, child, depth + 1)?;
            }
            writeln!(f, "{pad}}}")
        }
        Stmt::Block(block) => write_block(f, block, &pad),
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, pad: &str) -> fmt::Result {
    let mut header = String::new();
    for (i, iv) in block.iter_vars.iter().enumerate() {
        if i > 0 {
            header.push_str(", ");
        }
        let letter = iv.kind.letter();
        write!(header, "v{i}:{letter}{}={}", iv.extent, iv.binding)?;
    }
    writeln!(
        f,
        "{pad}block {} {}[{header}]{} {{",
        block.id,
        block.name,
        annotations(&block.annotations)
    )?;
    for predicate in &block.predicates {
        writeln!(f, "{pad}  where {} < {}", predicate.expr, predicate.bound)?;
    }
    if let Some(store) = &block.store {
        let target = crate::expr::Expr::Load(store.target.clone());
        writeln!(f, "{pad}  {target} {} {}", store.operator(), store.value)?;
    }
    writeln!(f, "{pad}}}")
}

fn annotations(map: &crate::ir::Annotations) -> String {
    if map.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!(" {{{}}}", entries.join(", "))
}
