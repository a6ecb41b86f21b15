// ir.rs — Intermediate representation for compiled channel graphs
//
// The IR is an arena of instants (zero- or one-argument procedure nodes with
// ordered operation bodies) and boxes (persistent storage cells). The signal
// algebra appends operations while the robot description runs; the optimizer
// rewrites bodies; the emitter folds the live part of the arena into C text.
//
// Every operation-building method validates scalar kinds against the declared
// kind of its target and panics on mismatch: an invalid program description is
// a contract violation, not a recoverable error.

use std::collections::BTreeSet;

use crate::catalog::{ExternalFn, ParamSpec};
use crate::id::{BoxId, IdAllocator, InstantId};

// ── Scalar kinds and values ────────────────────────────────────────────────

/// The three scalar kinds a parameter, box, or literal can have. A missing
/// kind (`Option<Kind>::None`) is the trigger case: no value at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Bool,
    Int,
    Float,
}

impl Kind {
    /// The C type a value of this kind is declared as.
    pub fn c_type(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "double",
        }
    }
}

/// A literal scalar value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn kind(self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
        }
    }
}

/// Encode a literal as C source text.
///
/// Floats that are not finite get arithmetic spellings: default propagation
/// follows IEEE-754 through division, so NaN and the infinities are legal
/// initial values and must survive emission as compilable text.
pub fn encode_value(value: Value) -> String {
    match value {
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => encode_double(f),
    }
}

fn encode_double(f: f64) -> String {
    if f.is_nan() {
        "(0.0 / 0.0)".to_string()
    } else if f == f64::INFINITY {
        "(1.0 / 0.0)".to_string()
    } else if f == f64::NEG_INFINITY {
        "(-1.0 / 0.0)".to_string()
    } else {
        // {:?} keeps a decimal point or exponent, so the literal stays a
        // double in C ("0.0", "1.5", "1e300").
        format!("{:?}", f)
    }
}

// ── Operands ───────────────────────────────────────────────────────────────

/// A leaf operand inside an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// The argument of the instant identified here. During construction this
    /// is always the enclosing instant; after inlining it may name a local
    /// binding introduced by the splice.
    Param(InstantId),
    /// The current value of a box.
    Read(BoxId),
    /// A literal.
    Lit(Value),
    /// An instant passed as a callback argument to an external function.
    Callback(InstantId),
    /// A named external function passed as a callback argument. Produced by
    /// the optimizer when a callback target is eliminated.
    ExtRef(String),
}

/// Binary operators usable in computed arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

impl BinOp {
    pub fn c_symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    fn operand_kind(self) -> Kind {
        match self {
            BinOp::And | BinOp::Or => Kind::Bool,
            _ => Kind::Float,
        }
    }
}

/// Unary operators usable in computed arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub fn c_symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }

    fn operand_kind(self) -> Kind {
        match self {
            UnOp::Neg => Kind::Float,
            UnOp::Not => Kind::Bool,
        }
    }
}

/// A computed value: what can be passed to an invocation or stored in a box.
#[derive(Debug, Clone, PartialEq)]
pub enum Rvalue {
    Atom(Atom),
    Unary { op: UnOp, operand: Atom },
    Binary { left: Atom, op: BinOp, right: Atom },
    /// A call to an external function used as an expression. Only built
    /// through [`IrGraph::push_call_external`], which validates against the
    /// catalog entry.
    CallExt { func: String, args: Vec<Atom> },
}

/// Comparison operator for conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
}

/// Condition of a conditional dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Compare { op: CmpOp, a: Atom, b: Atom },
    /// Comparison against literal `true`, emitted as a bare truth test.
    Truthy(Atom),
}

/// The call inside a conditional arm. An arm whose target was eliminated
/// becomes `Nop` and emits as an empty statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Call {
        target: InstantId,
        arg: Option<Atom>,
    },
    Nop,
}

// ── Operations ─────────────────────────────────────────────────────────────

/// One element of an instant body.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Call another instant, passing a computed argument if it takes one.
    Invoke {
        target: InstantId,
        arg: Option<Rvalue>,
    },
    /// Call an external function for effect (no result consumer).
    CallExt { func: String, args: Vec<Atom> },
    /// Assign into a box.
    Set { target: BoxId, value: Rvalue },
    /// A local binding introduced when an instant body is spliced into its
    /// unique caller: the callee's parameter becomes a local named after the
    /// callee's id. Only the optimizer produces this.
    DeclareLocal {
        slot: InstantId,
        kind: Kind,
        value: Rvalue,
    },
    If {
        cond: Cond,
        then: Invocation,
    },
    IfElse {
        cond: Cond,
        then: Invocation,
        els: Invocation,
    },
    /// Placeholder left by the optimizer; stripped by the nop pass.
    Nop,
}

// ── Nodes ──────────────────────────────────────────────────────────────────

/// A procedure node. The parameter kind is fixed at creation.
#[derive(Debug, Clone)]
pub struct Instant {
    pub param: Option<Kind>,
    pub body: Vec<Op>,
}

/// A persistent storage cell with a fixed initial value.
#[derive(Debug, Clone)]
pub struct BoxDef {
    pub kind: Kind,
    pub initial: Value,
}

// ── Graph arena ────────────────────────────────────────────────────────────

/// The IR arena. Owned by one compilation context; nodes are referenced by
/// id from multiple places and never copied.
#[derive(Debug, Default)]
pub struct IrGraph {
    instants: Vec<Instant>,
    boxes: Vec<BoxDef>,
    ids: IdAllocator,
}

impl IrGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_instant(&mut self, param: Option<Kind>) -> InstantId {
        let id = self.ids.alloc_instant();
        debug_assert_eq!(id.0 as usize, self.instants.len());
        self.instants.push(Instant {
            param,
            body: Vec::new(),
        });
        id
    }

    pub fn new_box(&mut self, initial: Value) -> BoxId {
        let id = self.ids.alloc_box();
        debug_assert_eq!(id.0 as usize, self.boxes.len());
        self.boxes.push(BoxDef {
            kind: initial.kind(),
            initial,
        });
        id
    }

    pub fn instant(&self, id: InstantId) -> &Instant {
        &self.instants[id.0 as usize]
    }

    pub fn instant_mut(&mut self, id: InstantId) -> &mut Instant {
        &mut self.instants[id.0 as usize]
    }

    pub fn box_def(&self, id: BoxId) -> &BoxDef {
        &self.boxes[id.0 as usize]
    }

    pub fn instant_count(&self) -> usize {
        self.instants.len()
    }

    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    // ── Kind computation ───────────────────────────────────────────────────

    /// Scalar kind of an atom as seen from inside `host`. Returns `None` for
    /// function-typed atoms (callbacks), which are only legal in external
    /// call arguments.
    pub fn atom_kind(&self, host: InstantId, atom: &Atom) -> Option<Kind> {
        match atom {
            Atom::Param(owner) => {
                assert_eq!(
                    *owner, host,
                    "param of instant {} referenced from instant {}",
                    owner.0, host.0
                );
                Some(self.instant(*owner).param.unwrap_or_else(|| {
                    panic!("instant {} takes no parameter", owner.0)
                }))
            }
            Atom::Read(b) => Some(self.box_def(*b).kind),
            Atom::Lit(v) => Some(v.kind()),
            Atom::Callback(_) | Atom::ExtRef(_) => None,
        }
    }

    fn scalar_kind(&self, host: InstantId, atom: &Atom) -> Kind {
        self.atom_kind(host, atom)
            .unwrap_or_else(|| panic!("callback used where a scalar value was expected"))
    }

    fn rvalue_kind(&self, host: InstantId, rv: &Rvalue) -> Kind {
        match rv {
            Rvalue::Atom(a) => self.scalar_kind(host, a),
            Rvalue::Unary { op, operand } => {
                let k = self.scalar_kind(host, operand);
                assert_eq!(
                    k,
                    op.operand_kind(),
                    "operator {} applied to {:?} operand",
                    op.c_symbol(),
                    k
                );
                op.operand_kind()
            }
            Rvalue::Binary { left, op, right } => {
                let lk = self.scalar_kind(host, left);
                let rk = self.scalar_kind(host, right);
                assert!(
                    lk == op.operand_kind() && rk == op.operand_kind(),
                    "operator {} applied to {:?}/{:?} operands",
                    op.c_symbol(),
                    lk,
                    rk
                );
                op.operand_kind()
            }
            Rvalue::CallExt { func, .. } => {
                panic!("external call {} must be built through push_call_external", func)
            }
        }
    }

    fn check_arg(&self, host: InstantId, target: InstantId, arg: &Option<Rvalue>) {
        match (self.instant(target).param, arg) {
            (None, None) => {}
            (None, Some(_)) => panic!(
                "instant {} takes no parameter but was invoked with one",
                target.0
            ),
            (Some(k), Some(rv)) => {
                let got = self.rvalue_kind(host, rv);
                assert_eq!(
                    got, k,
                    "type mismatch invoking instant {}: got {:?} but expected {:?}",
                    target.0, got, k
                );
            }
            (Some(_), None) => panic!(
                "instant {} takes a parameter but was invoked without one",
                target.0
            ),
        }
    }

    // ── Operation builders ─────────────────────────────────────────────────

    /// Append a direct call. `arg` must not be an external-call expression;
    /// those are appended through [`push_call_external`](Self::push_call_external).
    pub fn push_invoke(&mut self, host: InstantId, target: InstantId, arg: Option<Rvalue>) {
        if let Some(Rvalue::CallExt { .. }) = arg {
            panic!("push_invoke cannot carry an external call argument");
        }
        self.check_arg(host, target, &arg);
        self.instant_mut(host).body.push(Op::Invoke { target, arg });
    }

    /// Append an assignment into a box.
    pub fn push_set(&mut self, host: InstantId, target: BoxId, value: Rvalue) {
        let got = self.rvalue_kind(host, &value);
        let expected = self.box_def(target).kind;
        assert_eq!(
            got, expected,
            "type mismatch storing into box {}: got {:?} but expected {:?}",
            target.0, got, expected
        );
        self.instant_mut(host).body.push(Op::Set { target, value });
    }

    /// Append a conditional dispatch comparing two scalar operands.
    pub fn push_if(
        &mut self,
        host: InstantId,
        op: CmpOp,
        a: Atom,
        b: Atom,
        target: InstantId,
        arg: Option<Atom>,
    ) {
        let ka = self.scalar_kind(host, &a);
        let kb = self.scalar_kind(host, &b);
        assert_eq!(ka, kb, "comparison of {:?} against {:?}", ka, kb);
        let arg_rv = arg.clone().map(Rvalue::Atom);
        self.check_arg(host, target, &arg_rv);
        self.instant_mut(host).body.push(Op::If {
            cond: Cond::Compare { op, a, b },
            then: Invocation::Call { target, arg },
        });
    }

    /// Append a two-way conditional dispatch on `a == b`, taking the first
    /// arm when equal. Comparison against literal `true` collapses to a bare
    /// truth test.
    pub fn push_if_else(
        &mut self,
        host: InstantId,
        a: Atom,
        b: Atom,
        then: (InstantId, Option<Atom>),
        els: (InstantId, Option<Atom>),
    ) {
        let ka = self.scalar_kind(host, &a);
        let kb = self.scalar_kind(host, &b);
        assert_eq!(ka, kb, "comparison of {:?} against {:?}", ka, kb);
        for (target, arg) in [&then, &els] {
            let arg_rv = arg.clone().map(Rvalue::Atom);
            self.check_arg(host, *target, &arg_rv);
        }
        let cond = if b == Atom::Lit(Value::Bool(true)) {
            Cond::Truthy(a)
        } else {
            Cond::Compare { op: CmpOp::Eq, a, b }
        };
        self.instant_mut(host).body.push(Op::IfElse {
            cond,
            then: Invocation::Call {
                target: then.0,
                arg: then.1,
            },
            els: Invocation::Call {
                target: els.0,
                arg: els.1,
            },
        });
    }

    /// Append a call to an external function, validated against its catalog
    /// entry. With `feed`, the return value is passed on to the given
    /// instant; without it the function must not return a value.
    pub fn push_call_external(
        &mut self,
        host: InstantId,
        ext: &ExternalFn,
        args: Vec<Atom>,
        feed: Option<InstantId>,
    ) {
        assert_eq!(
            args.len(),
            ext.params.len(),
            "argument count mismatch on external {}: got {} but expected {}",
            ext.name,
            args.len(),
            ext.params.len()
        );
        for (arg, spec) in args.iter().zip(&ext.params) {
            match spec {
                ParamSpec::Scalar(k) => {
                    let got = self.scalar_kind(host, arg);
                    assert_eq!(
                        got, *k,
                        "type mismatch on external {}: got {:?} but expected {:?}",
                        ext.name, got, k
                    );
                }
                ParamSpec::Callback => match arg {
                    Atom::Callback(i) => assert!(
                        self.instant(*i).param.is_none(),
                        "callback passed to {} must not take a parameter",
                        ext.name
                    ),
                    Atom::ExtRef(_) => {}
                    other => panic!(
                        "external {} expects a callback, got {:?}",
                        ext.name, other
                    ),
                },
            }
        }
        let op = match feed {
            Some(target) => {
                let ret = ext.ret.unwrap_or_else(|| {
                    panic!("external {} returns nothing but a result target was given", ext.name)
                });
                let expected = self.instant(target).param.unwrap_or_else(|| {
                    panic!("instant {} takes no parameter", target.0)
                });
                assert_eq!(
                    ret, expected,
                    "type mismatch feeding external {} into instant {}: got {:?} but expected {:?}",
                    ext.name, target.0, ret, expected
                );
                Op::Invoke {
                    target,
                    arg: Some(Rvalue::CallExt {
                        func: ext.name.clone(),
                        args,
                    }),
                }
            }
            None => {
                assert!(
                    ext.ret.is_none(),
                    "external {} returns a value that would be discarded",
                    ext.name
                );
                Op::CallExt {
                    func: ext.name.clone(),
                    args,
                }
            }
        };
        self.instant_mut(host).body.push(op);
    }

    // ── Reference scanning and reachability ────────────────────────────────

    /// All instants referenced by one operation, in operand order. One entry
    /// per occurrence; the refcounting pass relies on that.
    pub fn op_references(op: &Op, out: &mut Vec<InstantId>) {
        fn atom_refs(atom: &Atom, out: &mut Vec<InstantId>) {
            if let Atom::Callback(i) = atom {
                out.push(*i);
            }
        }
        fn rvalue_refs(rv: &Rvalue, out: &mut Vec<InstantId>) {
            match rv {
                Rvalue::Atom(a) | Rvalue::Unary { operand: a, .. } => atom_refs(a, out),
                Rvalue::Binary { left, right, .. } => {
                    atom_refs(left, out);
                    atom_refs(right, out);
                }
                Rvalue::CallExt { args, .. } => {
                    for a in args {
                        atom_refs(a, out);
                    }
                }
            }
        }
        fn invocation_refs(inv: &Invocation, out: &mut Vec<InstantId>) {
            if let Invocation::Call { target, arg } = inv {
                out.push(*target);
                if let Some(a) = arg {
                    atom_refs(a, out);
                }
            }
        }
        match op {
            Op::Invoke { target, arg } => {
                out.push(*target);
                if let Some(rv) = arg {
                    rvalue_refs(rv, out);
                }
            }
            Op::CallExt { args, .. } => {
                for a in args {
                    atom_refs(a, out);
                }
            }
            Op::Set { value, .. } | Op::DeclareLocal { value, .. } => rvalue_refs(value, out),
            Op::If { then, .. } => invocation_refs(then, out),
            Op::IfElse { then, els, .. } => {
                invocation_refs(then, out);
                invocation_refs(els, out);
            }
            Op::Nop => {}
        }
    }

    /// All instants referenced anywhere in `id`'s body (one entry per
    /// occurrence).
    pub fn references(&self, id: InstantId) -> Vec<InstantId> {
        let mut out = Vec::new();
        for op in &self.instant(id).body {
            Self::op_references(op, &mut out);
        }
        out
    }

    /// The set of instants transitively reachable from `root`. Anything
    /// outside this set is dead code.
    pub fn reachable_from(&self, root: InstantId) -> BTreeSet<InstantId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for r in self.references(id) {
                if !seen.contains(&r) {
                    stack.push(r);
                }
            }
        }
        seen
    }

    /// All boxes referenced by the given instants, sorted by id.
    pub fn referenced_boxes(&self, live: &BTreeSet<InstantId>) -> BTreeSet<BoxId> {
        fn atom_boxes(atom: &Atom, out: &mut BTreeSet<BoxId>) {
            if let Atom::Read(b) = atom {
                out.insert(*b);
            }
        }
        fn rvalue_boxes(rv: &Rvalue, out: &mut BTreeSet<BoxId>) {
            match rv {
                Rvalue::Atom(a) | Rvalue::Unary { operand: a, .. } => atom_boxes(a, out),
                Rvalue::Binary { left, right, .. } => {
                    atom_boxes(left, out);
                    atom_boxes(right, out);
                }
                Rvalue::CallExt { args, .. } => {
                    for a in args {
                        atom_boxes(a, out);
                    }
                }
            }
        }
        fn cond_boxes(cond: &Cond, out: &mut BTreeSet<BoxId>) {
            match cond {
                Cond::Compare { a, b, .. } => {
                    atom_boxes(a, out);
                    atom_boxes(b, out);
                }
                Cond::Truthy(a) => atom_boxes(a, out),
            }
        }
        fn invocation_boxes(inv: &Invocation, out: &mut BTreeSet<BoxId>) {
            if let Invocation::Call { arg: Some(a), .. } = inv {
                atom_boxes(a, out);
            }
        }
        let mut out = BTreeSet::new();
        for &id in live {
            for op in &self.instant(id).body {
                match op {
                    Op::Invoke { arg, .. } => {
                        if let Some(rv) = arg {
                            rvalue_boxes(rv, &mut out);
                        }
                    }
                    Op::CallExt { args, .. } => {
                        for a in args {
                            atom_boxes(a, &mut out);
                        }
                    }
                    Op::Set { target, value } => {
                        out.insert(*target);
                        rvalue_boxes(value, &mut out);
                    }
                    Op::DeclareLocal { value, .. } => rvalue_boxes(value, &mut out),
                    Op::If { cond, then } => {
                        cond_boxes(cond, &mut out);
                        invocation_boxes(then, &mut out);
                    }
                    Op::IfElse { cond, then, els } => {
                        cond_boxes(cond, &mut out);
                        invocation_boxes(then, &mut out);
                        invocation_boxes(els, &mut out);
                    }
                    Op::Nop => {}
                }
            }
        }
        out
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
