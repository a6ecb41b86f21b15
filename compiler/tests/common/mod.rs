// Test harness: a small interpreter over the optimized IR.
//
// Executes instants against an environment of box values, catalog filter
// evaluators, scripted pull values, and recorded device pushes, so runtime
// behavior (edge detection, toggling, ramping) can be asserted without a C
// toolchain. Timer and driver-station registrations are captured; tests
// fire the registered callbacks by hand.

use std::collections::BTreeMap;

use rcc::id::{BoxId, InstantId};
use rcc::ir::{encode_value, Atom, BinOp, CmpOp, Cond, Invocation, Op, Rvalue, UnOp, Value};
use rcc::pipeline::LoweredProgram;

/// Key for a scripted pull value: the rendered call, e.g.
/// `get_joystick_axis(0, 2)`.
pub fn pull_key(func: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(|v| encode_value(*v)).collect();
    format!("{}({})", func, rendered.join(", "))
}

pub struct Interp<'a> {
    program: &'a LoweredProgram,
    boxes: BTreeMap<BoxId, Value>,
    pulls: BTreeMap<String, Value>,
    /// Every effectful external call, in execution order: (name, scalar args).
    pub pushes: Vec<(String, Vec<Value>)>,
    /// Periodic timer registrations: (period_ns, callback).
    pub periodic: Vec<(i64, Option<InstantId>)>,
    /// Pending one-shot timers: (delay_ns, callback).
    pub one_shots: Vec<(i64, Option<InstantId>)>,
    /// Callback registrations by external name (ds_begin, interrupts).
    pub registered: Vec<(String, InstantId)>,
    /// The callback handed to enter_loop, if the root ran.
    pub loop_entry: Option<Option<InstantId>>,
}

impl<'a> Interp<'a> {
    pub fn new(program: &'a LoweredProgram) -> Interp<'a> {
        Interp {
            program,
            boxes: BTreeMap::new(),
            pulls: BTreeMap::new(),
            pushes: Vec::new(),
            periodic: Vec::new(),
            one_shots: Vec::new(),
            registered: Vec::new(),
            loop_entry: None,
        }
    }

    /// Script the value a pull primitive returns.
    pub fn set_pull(&mut self, func: &str, args: &[Value], value: Value) {
        self.pulls.insert(pull_key(func, args), value);
    }

    /// Run the root: device init plus registrations. Does not loop.
    pub fn run_root(&mut self) {
        self.fire(self.program.root);
    }

    pub fn fire(&mut self, id: InstantId) {
        self.run(id, None);
    }

    pub fn fire_with(&mut self, id: InstantId, value: Value) {
        self.run(id, Some(value));
    }

    /// The single periodic callback; panics unless exactly one timer was
    /// registered with a live callback.
    pub fn periodic_callback(&self) -> InstantId {
        assert_eq!(self.periodic.len(), 1, "expected exactly one periodic timer");
        self.periodic[0].1.expect("periodic timer callback was eliminated")
    }

    /// Fire and clear all pending one-shot timers, in registration order.
    pub fn fire_one_shots(&mut self) {
        let pending = std::mem::take(&mut self.one_shots);
        for (_, cb) in pending {
            if let Some(cb) = cb {
                self.fire(cb);
            }
        }
    }

    /// Scalar argument lists of every recorded call to `func`.
    pub fn pushes_of(&self, func: &str) -> Vec<Vec<Value>> {
        self.pushes
            .iter()
            .filter(|(name, _)| name == func)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn registered_callback(&self, func: &str) -> InstantId {
        self.registered
            .iter()
            .find(|(name, _)| name == func)
            .map(|(_, cb)| *cb)
            .unwrap_or_else(|| panic!("no callback registered via {}", func))
    }

    pub fn box_value(&mut self, id: BoxId) -> Value {
        let initial = self.program.graph.box_def(id).initial;
        *self.boxes.entry(id).or_insert(initial)
    }

    // ── Execution ──────────────────────────────────────────────────────────

    fn run(&mut self, id: InstantId, arg: Option<Value>) {
        let mut frame: BTreeMap<InstantId, Value> = BTreeMap::new();
        if let Some(v) = arg {
            frame.insert(id, v);
        }
        let body = self.program.graph.instant(id).body.clone();
        for op in &body {
            self.exec(&mut frame, op);
        }
    }

    fn exec(&mut self, frame: &mut BTreeMap<InstantId, Value>, op: &Op) {
        match op {
            Op::Invoke { target, arg } => {
                let value = arg.as_ref().map(|rv| self.eval_rvalue(frame, rv));
                self.run(*target, value);
            }
            Op::CallExt { func, args } => {
                let result = self.call_external(frame, func, args);
                assert!(result.is_none(), "discarded result from {}", func);
            }
            Op::Set { target, value } => {
                let v = self.eval_rvalue(frame, value);
                self.boxes.insert(*target, v);
            }
            Op::DeclareLocal { slot, value, .. } => {
                let v = self.eval_rvalue(frame, value);
                frame.insert(*slot, v);
            }
            Op::If { cond, then } => {
                if self.eval_cond(frame, cond) {
                    self.run_invocation(frame, then);
                }
            }
            Op::IfElse { cond, then, els } => {
                if self.eval_cond(frame, cond) {
                    self.run_invocation(frame, then);
                } else {
                    self.run_invocation(frame, els);
                }
            }
            Op::Nop => {}
        }
    }

    fn run_invocation(&mut self, frame: &mut BTreeMap<InstantId, Value>, inv: &Invocation) {
        match inv {
            Invocation::Call { target, arg } => {
                let value = arg.as_ref().map(|a| self.eval_atom(frame, a));
                self.run(*target, value);
            }
            Invocation::Nop => {}
        }
    }

    fn eval_cond(&mut self, frame: &BTreeMap<InstantId, Value>, cond: &Cond) -> bool {
        match cond {
            Cond::Compare { op, a, b } => {
                let a = self.eval_atom(frame, a);
                let b = self.eval_atom(frame, b);
                match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                }
            }
            Cond::Truthy(a) => match self.eval_atom(frame, a) {
                Value::Bool(b) => b,
                other => panic!("truth test on non-bool {:?}", other),
            },
        }
    }

    fn eval_atom(&mut self, frame: &BTreeMap<InstantId, Value>, atom: &Atom) -> Value {
        match atom {
            Atom::Param(slot) => *frame
                .get(slot)
                .unwrap_or_else(|| panic!("no binding for param{}", slot.0)),
            Atom::Read(b) => self.box_value(*b),
            Atom::Lit(v) => *v,
            Atom::Callback(_) | Atom::ExtRef(_) => {
                panic!("callback atom in scalar position")
            }
        }
    }

    fn eval_rvalue(&mut self, frame: &BTreeMap<InstantId, Value>, rv: &Rvalue) -> Value {
        match rv {
            Rvalue::Atom(a) => self.eval_atom(frame, a),
            Rvalue::Unary { op, operand } => {
                let v = self.eval_atom(frame, operand);
                match (op, v) {
                    (UnOp::Neg, Value::Float(f)) => Value::Float(-f),
                    (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    other => panic!("bad unary operand {:?}", other),
                }
            }
            Rvalue::Binary { left, op, right } => {
                let l = self.eval_atom(frame, left);
                let r = self.eval_atom(frame, right);
                match (l, r) {
                    (Value::Float(a), Value::Float(b)) => Value::Float(match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => a / b,
                        _ => panic!("bad float operator {:?}", op),
                    }),
                    (Value::Bool(a), Value::Bool(b)) => Value::Bool(match op {
                        BinOp::And => a && b,
                        BinOp::Or => a || b,
                        _ => panic!("bad bool operator {:?}", op),
                    }),
                    other => panic!("bad binary operands {:?}", other),
                }
            }
            Rvalue::CallExt { func, args } => self
                .call_external(frame, func, args)
                .unwrap_or_else(|| panic!("{} produced no value", func)),
        }
    }

    /// Dispatch an external call: pure filters use the catalog evaluators,
    /// pulls come from the scripted values, registrations are recorded, and
    /// everything else is logged as a device push.
    fn call_external(
        &mut self,
        frame: &BTreeMap<InstantId, Value>,
        func: &str,
        args: &[Atom],
    ) -> Option<Value> {
        let mut scalars = Vec::new();
        let mut callback: Option<Option<InstantId>> = None;
        for a in args {
            match a {
                Atom::Callback(i) => callback = Some(Some(*i)),
                Atom::ExtRef(name) => {
                    assert_eq!(name, "do_nothing", "unexpected external reference {}", name);
                    callback = Some(None);
                }
                other => scalars.push(self.eval_atom(frame, other)),
            }
        }

        let ext = self
            .program
            .catalog
            .lookup(func)
            .unwrap_or_else(|| panic!("external {} not in catalog", func));
        let eval = ext.eval;
        let has_ret = ext.ret.is_some();
        if let Some(eval) = eval {
            return Some(eval(&scalars));
        }

        match func {
            "start_timer_ns" => {
                let period = match scalars[0] {
                    Value::Int(ns) => ns,
                    _ => unreachable!(),
                };
                self.periodic.push((period, callback.expect("timer callback")));
                None
            }
            "run_after_ns" => {
                let delay = match scalars[0] {
                    Value::Int(ns) => ns,
                    _ => unreachable!(),
                };
                self.one_shots.push((delay, callback.expect("timer callback")));
                None
            }
            "enter_loop" => {
                self.loop_entry = Some(callback.expect("loop entry callback"));
                None
            }
            _ => {
                if let Some(Some(cb)) = callback {
                    self.registered.push((func.to_string(), cb));
                }
                if has_ret {
                    let key = pull_key(func, &scalars);
                    return Some(*self.pulls.get(&key).unwrap_or_else(|| {
                        panic!("no pull value scripted for {}", key)
                    }));
                }
                self.pushes.push((func.to_string(), scalars));
                None
            }
        }
    }
}
