// codegen.rs — C code generation
//
// A pure, deterministic fold over the optimized graph: one global per live
// box, one forward declaration and one definition per live instant (both
// id-ordered so mutual references compile regardless of body order), and an
// entry point that invokes the root once and traps if control ever returns
// from it. The emitter performs no optimization and no validation beyond
// what the templates assert structurally.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::id::{BoxId, InstantId};
use crate::ir::{encode_value, Atom, Cond, Invocation, IrGraph, Op, Rvalue};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Header the generated program includes for the runtime surface.
    pub runtime_header: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            runtime_header: "runtime.h".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct GeneratedCode {
    pub c_source: String,
}

// ── Names ───────────────────────────────────────────────────────────────────

pub fn instant_name(id: InstantId) -> String {
    format!("instant{}", id.0)
}

pub fn param_name(id: InstantId) -> String {
    format!("param{}", id.0)
}

pub fn box_name(id: BoxId) -> String {
    format!("box{}", id.0)
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Emit the whole translation unit for `(root, live)`.
pub fn emit(
    graph: &IrGraph,
    root: InstantId,
    live: &BTreeSet<InstantId>,
    options: &CodegenOptions,
) -> GeneratedCode {
    let mut e = Emitter { out: String::new() };
    e.emit_preamble(&options.runtime_header);
    e.emit_boxes(graph, live);
    e.emit_stubs(graph, live);
    e.emit_definitions(graph, live);
    e.emit_entry_point(root);
    GeneratedCode { c_source: e.out }
}

// ── Emitter ─────────────────────────────────────────────────────────────────

struct Emitter {
    out: String,
}

impl Emitter {
    fn emit_preamble(&mut self, runtime_header: &str) {
        self.out.push_str("// Generated by rcc (Reactive Channel Compiler)\n");
        let _ = writeln!(self.out, "#include \"{}\"", runtime_header);
    }

    fn emit_boxes(&mut self, graph: &IrGraph, live: &BTreeSet<InstantId>) {
        // BTreeSet iteration gives id order
        for id in graph.referenced_boxes(live) {
            let def = graph.box_def(id);
            let _ = writeln!(
                self.out,
                "static {} {} = {};",
                def.kind.c_type(),
                box_name(id),
                encode_value(def.initial)
            );
        }
    }

    fn signature(graph: &IrGraph, id: InstantId) -> String {
        match graph.instant(id).param {
            None => format!("static void {}(void)", instant_name(id)),
            Some(k) => format!(
                "static void {}({} {})",
                instant_name(id),
                k.c_type(),
                param_name(id)
            ),
        }
    }

    fn emit_stubs(&mut self, graph: &IrGraph, live: &BTreeSet<InstantId>) {
        for &id in live {
            let _ = writeln!(self.out, "{};", Self::signature(graph, id));
        }
    }

    fn emit_definitions(&mut self, graph: &IrGraph, live: &BTreeSet<InstantId>) {
        for &id in live {
            let _ = writeln!(self.out, "{} {{", Self::signature(graph, id));
            for op in &graph.instant(id).body {
                for line in render_op(op) {
                    let _ = writeln!(self.out, "\t{}", line);
                }
            }
            self.out.push_str("}\n");
        }
    }

    fn emit_entry_point(&mut self, root: InstantId) {
        self.out.push_str("int main() {\n");
        let _ = writeln!(self.out, "\t{}();", instant_name(root));
        self.out
            .push_str("\tpanic(\"critical failure: root instant returned\");\n");
        self.out.push_str("}\n");
    }
}

// ── Templates ───────────────────────────────────────────────────────────────

fn render_atom(atom: &Atom) -> String {
    match atom {
        Atom::Param(id) => param_name(*id),
        Atom::Read(id) => box_name(*id),
        Atom::Lit(v) => encode_value(*v),
        Atom::Callback(id) => instant_name(*id),
        Atom::ExtRef(name) => name.clone(),
    }
}

fn render_rvalue(rv: &Rvalue) -> String {
    match rv {
        Rvalue::Atom(a) => render_atom(a),
        Rvalue::Unary { op, operand } => format!("{}{}", op.c_symbol(), render_atom(operand)),
        Rvalue::Binary { left, op, right } => format!(
            "{} {} {}",
            render_atom(left),
            op.c_symbol(),
            render_atom(right)
        ),
        Rvalue::CallExt { func, args } => render_call(func, args),
    }
}

fn render_call(func: &str, args: &[Atom]) -> String {
    let rendered: Vec<String> = args.iter().map(render_atom).collect();
    format!("{}({})", func, rendered.join(", "))
}

fn render_cond(cond: &Cond) -> String {
    match cond {
        Cond::Compare { op, a, b } => {
            let sym = match op {
                crate::ir::CmpOp::Eq => "==",
                crate::ir::CmpOp::Ne => "!=",
            };
            format!("{} {} {}", render_atom(a), sym, render_atom(b))
        }
        Cond::Truthy(a) => render_atom(a),
    }
}

fn render_invocation(inv: &Invocation) -> String {
    match inv {
        Invocation::Call { target, arg } => match arg {
            Some(a) => format!("{}({});", instant_name(*target), render_atom(a)),
            None => format!("{}();", instant_name(*target)),
        },
        Invocation::Nop => ";".to_string(),
    }
}

/// Render one operation as body lines (indentation added by the caller).
fn render_op(op: &Op) -> Vec<String> {
    match op {
        Op::Invoke { target, arg } => match arg {
            Some(rv) => vec![format!("{}({});", instant_name(*target), render_rvalue(rv))],
            None => vec![format!("{}();", instant_name(*target))],
        },
        Op::CallExt { func, args } => vec![format!("{};", render_call(func, args))],
        Op::Set { target, value } => {
            vec![format!("{} = {};", box_name(*target), render_rvalue(value))]
        }
        Op::DeclareLocal { slot, kind, value } => vec![format!(
            "{} {} = {};",
            kind.c_type(),
            param_name(*slot),
            render_rvalue(value)
        )],
        Op::If { cond, then } => vec![
            format!("if ({}) {{", render_cond(cond)),
            format!("\t{}", render_invocation(then)),
            "}".to_string(),
        ],
        Op::IfElse { cond, then, els } => vec![
            format!("if ({}) {{", render_cond(cond)),
            format!("\t{}", render_invocation(then)),
            "} else {".to_string(),
            format!("\t{}", render_invocation(els)),
            "}".to_string(),
        ],
        Op::Nop => vec![";".to_string()],
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
