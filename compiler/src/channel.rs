// channel.rs — Typed signal algebra
//
// The composition surface of the compiler: typed input/output ports and the
// combinators that wire them together. Building a combinator never executes
// anything; it allocates IR nodes and registers references, and tracks the
// default value each input would carry before the first real event.
//
// Port kinds are separate Rust types, so crossing float/boolean/trigger
// wires is a compile error in the robot description itself. Discrete ports
// carry their enumeration id and check it at composition time.
//
// Every Input wraps a dispatch instant whose body is the list of subscriber
// invokes; every Output wraps an instant invoked with the current value. A
// cell is a bound pair around one shared instant.

use crate::context::{Context, DiscreteTypeId};
use crate::id::{BoxId, InstantId};
use crate::ir::{Atom, BinOp, CmpOp, Kind, Rvalue, UnOp, Value};
use crate::timer;

// ── Trigger channels ────────────────────────────────────────────────────────

/// A trigger source: subscribers are invoked with no payload.
#[derive(Debug, Clone, Copy)]
pub struct EventInput {
    pub(crate) dispatch: InstantId,
}

/// A trigger sink.
#[derive(Debug, Clone, Copy)]
pub struct EventOutput {
    pub(crate) instant: InstantId,
}

impl EventInput {
    pub fn send(self, ctx: &mut Context, output: EventOutput) {
        ctx.ir.push_invoke(self.dispatch, output.instant, None);
    }
}

impl EventOutput {
    /// Fire this output whenever `input` fires.
    pub fn when(self, ctx: &mut Context, input: EventInput) {
        input.send(ctx, self);
    }
}

/// A bound trigger pair sharing one dispatch instant.
pub fn event_cell(ctx: &mut Context) -> (EventOutput, EventInput) {
    let dispatch = ctx.ir.new_instant(None);
    (EventOutput { instant: dispatch }, EventInput { dispatch })
}

// ── Float channels ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FloatInput {
    pub(crate) dispatch: InstantId,
    default: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FloatOutput {
    pub(crate) instant: InstantId,
}

/// A bound float pair sharing one dispatch instant.
pub fn float_cell(ctx: &mut Context, default: f64) -> (FloatOutput, FloatInput) {
    let dispatch = ctx.ir.new_instant(Some(Kind::Float));
    (
        FloatOutput { instant: dispatch },
        FloatInput { dispatch, default },
    )
}

/// An input that only ever carries its fixed value. Costs nothing in the
/// emitted program unless something real flows through a combinator built
/// on it.
pub fn always_float(ctx: &mut Context, value: f64) -> FloatInput {
    let dispatch = ctx.ir.new_instant(Some(Kind::Float));
    FloatInput {
        dispatch,
        default: value,
    }
}

impl FloatInput {
    /// The value this input carries before the first real event.
    pub fn default_value(self) -> f64 {
        self.default
    }

    pub fn send(self, ctx: &mut Context, output: FloatOutput) {
        ctx.ir.push_invoke(
            self.dispatch,
            output.instant,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
    }

    /// Route this input through an external filter function:
    /// `func(*pre, value, *post)`. The function's compile-time evaluator
    /// propagates the default; filters without one are unusable here.
    pub fn filter(self, ctx: &mut Context, func: &str, pre: &[Value], post: &[Value]) -> FloatInput {
        let ext = ctx.catalog.expect(func).clone();
        let eval = ext.eval.unwrap_or_else(|| {
            panic!("external {} has no compile-time evaluator; filters require one", func)
        });

        let out = ctx.ir.new_instant(Some(Kind::Float));
        let stage = ctx.ir.new_instant(Some(Kind::Float));
        let mut args: Vec<Atom> = pre.iter().map(|v| Atom::Lit(*v)).collect();
        args.push(Atom::Param(stage));
        args.extend(post.iter().map(|v| Atom::Lit(*v)));
        ctx.ir.push_call_external(stage, &ext, args, Some(out));
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );

        let mut default_args: Vec<Value> = pre.to_vec();
        default_args.push(Value::Float(self.default));
        default_args.extend_from_slice(post);
        let default = match eval(&default_args) {
            Value::Float(f) => f,
            other => panic!("filter {} produced a non-float default: {:?}", func, other),
        };
        FloatInput {
            dispatch: out,
            default,
        }
    }

    pub fn deadzone(self, ctx: &mut Context, zone: f64) -> FloatInput {
        self.filter(ctx, "deadzone", &[], &[Value::Float(zone)])
    }

    pub fn negate(self, ctx: &mut Context) -> FloatInput {
        let out = ctx.ir.new_instant(Some(Kind::Float));
        let stage = ctx.ir.new_instant(Some(Kind::Float));
        ctx.ir.push_invoke(
            stage,
            out,
            Some(Rvalue::Unary {
                op: UnOp::Neg,
                operand: Atom::Param(stage),
            }),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        FloatInput {
            dispatch: out,
            default: -self.default,
        }
    }

    /// Multiply by a constant.
    pub fn scale(self, ctx: &mut Context, factor: f64) -> FloatInput {
        let out = ctx.ir.new_instant(Some(Kind::Float));
        let stage = ctx.ir.new_instant(Some(Kind::Float));
        ctx.ir.push_invoke(
            stage,
            out,
            Some(Rvalue::Binary {
                left: Atom::Param(stage),
                op: BinOp::Mul,
                right: Atom::Lit(Value::Float(factor)),
            }),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        FloatInput {
            dispatch: out,
            default: self.default * factor,
        }
    }

    /// Combine with another input. Each side caches its last value in a box;
    /// either side firing recomputes from both caches, so the result updates
    /// on every upstream event.
    fn operate(self, ctx: &mut Context, other: FloatInput, op: BinOp, default: f64) -> FloatInput {
        let left = ctx.ir.new_box(Value::Float(self.default));
        let right = ctx.ir.new_box(Value::Float(other.default));
        let out = ctx.ir.new_instant(Some(Kind::Float));
        let recompute = Rvalue::Binary {
            left: Atom::Read(left),
            op,
            right: Atom::Read(right),
        };
        for (upstream, cache) in [(self, left), (other, right)] {
            let update = ctx.ir.new_instant(Some(Kind::Float));
            ctx.ir
                .push_set(update, cache, Rvalue::Atom(Atom::Param(update)));
            ctx.ir.push_invoke(update, out, Some(recompute.clone()));
            ctx.ir.push_invoke(
                upstream.dispatch,
                update,
                Some(Rvalue::Atom(Atom::Param(upstream.dispatch))),
            );
        }
        FloatInput {
            dispatch: out,
            default,
        }
    }

    pub fn add(self, ctx: &mut Context, other: FloatInput) -> FloatInput {
        let d = self.default + other.default;
        self.operate(ctx, other, BinOp::Add, d)
    }

    pub fn sub(self, ctx: &mut Context, other: FloatInput) -> FloatInput {
        let d = self.default - other.default;
        self.operate(ctx, other, BinOp::Sub, d)
    }

    pub fn mul(self, ctx: &mut Context, other: FloatInput) -> FloatInput {
        let d = self.default * other.default;
        self.operate(ctx, other, BinOp::Mul, d)
    }

    /// Division carries IEEE-754 semantics through both the emitted C and
    /// the propagated default: 0/0 is NaN, a/0 is signed infinity.
    pub fn div(self, ctx: &mut Context, other: FloatInput) -> FloatInput {
        let d = self.default / other.default;
        self.operate(ctx, other, BinOp::Div, d)
    }

    /// Rate-limit this input: downstream moves toward the most recent
    /// upstream value by at most `rate_per_second`, stepped every
    /// `period_ms` by a shared ticker.
    pub fn with_ramping(self, ctx: &mut Context, rate_per_second: f64, period_ms: u32) -> FloatInput {
        assert!(rate_per_second > 0.0, "ramping rate must be positive");
        assert!(period_ms > 0, "ramping period must be positive");
        let max_change = rate_per_second * f64::from(period_ms) / 1000.0;

        let target = ctx.ir.new_box(Value::Float(self.default));
        let current = ctx.ir.new_box(Value::Float(self.default));
        let out = ctx.ir.new_instant(Some(Kind::Float));

        // upstream only moves the target
        let update = ctx.ir.new_instant(Some(Kind::Float));
        ctx.ir
            .push_set(update, target, Rvalue::Atom(Atom::Param(update)));
        ctx.ir.push_invoke(
            self.dispatch,
            update,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );

        // the ticker steps the current value and pushes it downstream
        let store = ctx.ir.new_instant(Some(Kind::Float));
        ctx.ir
            .push_set(store, current, Rvalue::Atom(Atom::Param(store)));
        ctx.ir.push_invoke(
            store,
            out,
            Some(Rvalue::Atom(Atom::Param(store))),
        );
        let step = ctx.ir.new_instant(None);
        let ramp = ctx.catalog.expect("ramping_update").clone();
        ctx.ir.push_call_external(
            step,
            &ramp,
            vec![
                Atom::Read(current),
                Atom::Read(target),
                Atom::Lit(Value::Float(max_change)),
            ],
            Some(store),
        );
        let tick = timer::ticker(ctx, period_ms);
        ctx.ir.push_invoke(tick.dispatch, step, None);

        FloatInput {
            dispatch: out,
            default: self.default,
        }
    }
}

impl FloatOutput {
    /// A trigger that writes a fixed value into this output.
    pub fn set_event(self, ctx: &mut Context, value: f64) -> EventOutput {
        let instant = ctx.ir.new_instant(None);
        ctx.ir.push_invoke(
            instant,
            self.instant,
            Some(Rvalue::Atom(Atom::Lit(Value::Float(value)))),
        );
        EventOutput { instant }
    }
}

/// Three-way multiplexer: the output recomputes from all three cached
/// upstream values whenever any one of them updates.
pub fn choose(
    ctx: &mut Context,
    cond: BooleanInput,
    when_true: FloatInput,
    when_false: FloatInput,
) -> FloatInput {
    let cond_cache = ctx.ir.new_box(Value::Bool(cond.default));
    let true_cache = ctx.ir.new_box(Value::Float(when_true.default));
    let false_cache = ctx.ir.new_box(Value::Float(when_false.default));
    let out = ctx.ir.new_instant(Some(Kind::Float));
    let ext = ctx.catalog.expect("choose_float").clone();

    let recompute_args = vec![
        Atom::Read(cond_cache),
        Atom::Read(true_cache),
        Atom::Read(false_cache),
    ];

    let cond_update = ctx.ir.new_instant(Some(Kind::Bool));
    ctx.ir.push_set(
        cond_update,
        cond_cache,
        Rvalue::Atom(Atom::Param(cond_update)),
    );
    ctx.ir
        .push_call_external(cond_update, &ext, recompute_args.clone(), Some(out));
    ctx.ir.push_invoke(
        cond.dispatch,
        cond_update,
        Some(Rvalue::Atom(Atom::Param(cond.dispatch))),
    );

    for (upstream, cache) in [(when_true, true_cache), (when_false, false_cache)] {
        let update = ctx.ir.new_instant(Some(Kind::Float));
        ctx.ir
            .push_set(update, cache, Rvalue::Atom(Atom::Param(update)));
        ctx.ir
            .push_call_external(update, &ext, recompute_args.clone(), Some(out));
        ctx.ir.push_invoke(
            upstream.dispatch,
            update,
            Some(Rvalue::Atom(Atom::Param(upstream.dispatch))),
        );
    }

    FloatInput {
        dispatch: out,
        default: if cond.default {
            when_true.default
        } else {
            when_false.default
        },
    }
}

// ── Boolean channels ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BooleanInput {
    pub(crate) dispatch: InstantId,
    default: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BooleanOutput {
    pub(crate) instant: InstantId,
}

pub fn always_boolean(ctx: &mut Context, value: bool) -> BooleanInput {
    let dispatch = ctx.ir.new_instant(Some(Kind::Bool));
    BooleanInput {
        dispatch,
        default: value,
    }
}

impl BooleanInput {
    pub fn default_value(self) -> bool {
        self.default
    }

    pub fn send(self, ctx: &mut Context, output: BooleanOutput) {
        ctx.ir.push_invoke(
            self.dispatch,
            output.instant,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
    }

    pub fn invert(self, ctx: &mut Context) -> BooleanInput {
        let out = ctx.ir.new_instant(Some(Kind::Bool));
        let stage = ctx.ir.new_instant(Some(Kind::Bool));
        ctx.ir.push_invoke(
            stage,
            out,
            Some(Rvalue::Unary {
                op: UnOp::Not,
                operand: Atom::Param(stage),
            }),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        BooleanInput {
            dispatch: out,
            default: !self.default,
        }
    }

    fn logic(self, ctx: &mut Context, other: BooleanInput, op: BinOp, default: bool) -> BooleanInput {
        let left = ctx.ir.new_box(Value::Bool(self.default));
        let right = ctx.ir.new_box(Value::Bool(other.default));
        let out = ctx.ir.new_instant(Some(Kind::Bool));
        let recompute = Rvalue::Binary {
            left: Atom::Read(left),
            op,
            right: Atom::Read(right),
        };
        for (upstream, cache) in [(self, left), (other, right)] {
            let update = ctx.ir.new_instant(Some(Kind::Bool));
            ctx.ir
                .push_set(update, cache, Rvalue::Atom(Atom::Param(update)));
            ctx.ir.push_invoke(update, out, Some(recompute.clone()));
            ctx.ir.push_invoke(
                upstream.dispatch,
                update,
                Some(Rvalue::Atom(Atom::Param(upstream.dispatch))),
            );
        }
        BooleanInput {
            dispatch: out,
            default,
        }
    }

    pub fn and(self, ctx: &mut Context, other: BooleanInput) -> BooleanInput {
        let d = self.default && other.default;
        self.logic(ctx, other, BinOp::And, d)
    }

    pub fn or(self, ctx: &mut Context, other: BooleanInput) -> BooleanInput {
        let d = self.default || other.default;
        self.logic(ctx, other, BinOp::Or, d)
    }

    /// Map to a float: `when_true` while the input holds true, `when_false`
    /// otherwise.
    pub fn select(self, ctx: &mut Context, when_true: f64, when_false: f64) -> FloatInput {
        let out = ctx.ir.new_instant(Some(Kind::Float));
        let stage = ctx.ir.new_instant(Some(Kind::Bool));
        let ext = ctx.catalog.expect("choose_float").clone();
        ctx.ir.push_call_external(
            stage,
            &ext,
            vec![
                Atom::Param(stage),
                Atom::Lit(Value::Float(when_true)),
                Atom::Lit(Value::Float(when_false)),
            ],
            Some(out),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        FloatInput {
            dispatch: out,
            default: if self.default { when_true } else { when_false },
        }
    }

    /// Edge detection. One box remembers the last value; the detector fires
    /// exactly one of the two triggers on an actual change and nothing on a
    /// repeated value. The pair is allocated once per input and cached.
    fn edge_pair(self, ctx: &mut Context) -> (EventInput, EventInput) {
        if let Some(&(press, release)) = ctx.edge_pairs.get(&self.dispatch) {
            return (
                EventInput { dispatch: press },
                EventInput { dispatch: release },
            );
        }
        let last = ctx.ir.new_box(Value::Bool(self.default));
        let press = ctx.ir.new_instant(None);
        let release = ctx.ir.new_instant(None);
        let changed = ctx.ir.new_instant(Some(Kind::Bool));
        ctx.ir
            .push_set(changed, last, Rvalue::Atom(Atom::Param(changed)));
        ctx.ir.push_if_else(
            changed,
            Atom::Param(changed),
            Atom::Lit(Value::Bool(true)),
            (press, None),
            (release, None),
        );
        let detect = ctx.ir.new_instant(Some(Kind::Bool));
        ctx.ir.push_if(
            detect,
            CmpOp::Ne,
            Atom::Param(detect),
            Atom::Read(last),
            changed,
            Some(Atom::Param(detect)),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            detect,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        ctx.edge_pairs.insert(self.dispatch, (press, release));
        (
            EventInput { dispatch: press },
            EventInput { dispatch: release },
        )
    }

    /// Fires when the value changes to true.
    pub fn press(self, ctx: &mut Context) -> EventInput {
        self.edge_pair(ctx).0
    }

    /// Fires when the value changes to false.
    pub fn release(self, ctx: &mut Context) -> EventInput {
        self.edge_pair(ctx).1
    }
}

impl BooleanOutput {
    /// A trigger that writes a fixed value into this output.
    pub fn set_event(self, ctx: &mut Context, value: bool) -> EventOutput {
        let instant = ctx.ir.new_instant(None);
        ctx.ir.push_invoke(
            instant,
            self.instant,
            Some(Rvalue::Atom(Atom::Lit(Value::Bool(value)))),
        );
        EventOutput { instant }
    }
}

/// A boolean cell: a change-gated dispatch around one value box. Repeated
/// writes of the current value do not reach subscribers, which is what makes
/// `toggle` and the set events well behaved.
pub struct BooleanCell {
    pub output: BooleanOutput,
    pub input: BooleanInput,
    value_box: BoxId,
    toggle: Option<EventOutput>,
    set_true: Option<EventOutput>,
    set_false: Option<EventOutput>,
}

pub fn boolean_cell(ctx: &mut Context, default: bool) -> BooleanCell {
    let value_box = ctx.ir.new_box(Value::Bool(default));
    let inner = ctx.ir.new_instant(Some(Kind::Bool));
    ctx.ir
        .push_set(inner, value_box, Rvalue::Atom(Atom::Param(inner)));
    let gate = ctx.ir.new_instant(Some(Kind::Bool));
    ctx.ir.push_if(
        gate,
        CmpOp::Ne,
        Atom::Param(gate),
        Atom::Read(value_box),
        inner,
        Some(Atom::Param(gate)),
    );
    BooleanCell {
        output: BooleanOutput { instant: gate },
        input: BooleanInput {
            dispatch: inner,
            default,
        },
        value_box,
        toggle: None,
        set_true: None,
        set_false: None,
    }
}

impl BooleanCell {
    /// A trigger that flips the stored value.
    pub fn toggle(&mut self, ctx: &mut Context) -> EventOutput {
        if let Some(t) = self.toggle {
            return t;
        }
        let instant = ctx.ir.new_instant(None);
        let gate = self.output.instant;
        ctx.ir.push_if_else(
            instant,
            Atom::Read(self.value_box),
            Atom::Lit(Value::Bool(true)),
            (gate, Some(Atom::Lit(Value::Bool(false)))),
            (gate, Some(Atom::Lit(Value::Bool(true)))),
        );
        let out = EventOutput { instant };
        self.toggle = Some(out);
        out
    }

    pub fn set_true(&mut self, ctx: &mut Context) -> EventOutput {
        if let Some(t) = self.set_true {
            return t;
        }
        let out = self.output.set_event(ctx, true);
        self.set_true = Some(out);
        out
    }

    pub fn set_false(&mut self, ctx: &mut Context) -> EventOutput {
        if let Some(t) = self.set_false {
            return t;
        }
        let out = self.output.set_event(ctx, false);
        self.set_false = Some(out);
        out
    }
}

// ── Discrete channels ───────────────────────────────────────────────────────

/// Input carrying one variant of a closed enumeration, encoded as an int.
#[derive(Debug, Clone, Copy)]
pub struct DiscreteInput {
    pub(crate) dispatch: InstantId,
    ty: DiscreteTypeId,
    default: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct DiscreteOutput {
    pub(crate) instant: InstantId,
    ty: DiscreteTypeId,
}

pub fn always_discrete(ctx: &mut Context, ty: DiscreteTypeId, variant: &str) -> DiscreteInput {
    let default = ctx.variant_index(ty, variant);
    let dispatch = ctx.ir.new_instant(Some(Kind::Int));
    DiscreteInput {
        dispatch,
        ty,
        default,
    }
}

impl DiscreteInput {
    pub fn default_index(self) -> i64 {
        self.default
    }

    pub fn send(self, ctx: &mut Context, output: DiscreteOutput) {
        assert_eq!(
            self.ty, output.ty,
            "discrete enumerations differ between input and output"
        );
        ctx.ir.push_invoke(
            self.dispatch,
            output.instant,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
    }

    /// Boolean view: true while this input holds the named variant.
    pub fn is_value(self, ctx: &mut Context, variant: &str) -> BooleanInput {
        let index = ctx.variant_index(self.ty, variant);
        let out = ctx.ir.new_instant(Some(Kind::Bool));
        let stage = ctx.ir.new_instant(Some(Kind::Int));
        ctx.ir.push_if_else(
            stage,
            Atom::Param(stage),
            Atom::Lit(Value::Int(index)),
            (out, Some(Atom::Lit(Value::Bool(true)))),
            (out, Some(Atom::Lit(Value::Bool(false)))),
        );
        ctx.ir.push_invoke(
            self.dispatch,
            stage,
            Some(Rvalue::Atom(Atom::Param(self.dispatch))),
        );
        BooleanInput {
            dispatch: out,
            default: self.default == index,
        }
    }
}

impl DiscreteOutput {
    /// A trigger that writes the named variant into this output.
    pub fn set_event(self, ctx: &mut Context, variant: &str) -> EventOutput {
        let index = ctx.variant_index(self.ty, variant);
        let instant = ctx.ir.new_instant(None);
        ctx.ir.push_invoke(
            instant,
            self.instant,
            Some(Rvalue::Atom(Atom::Lit(Value::Int(index)))),
        );
        EventOutput { instant }
    }
}

/// A discrete cell: change-gated like a boolean cell.
pub struct DiscreteCell {
    pub output: DiscreteOutput,
    pub input: DiscreteInput,
}

pub fn discrete_cell(ctx: &mut Context, ty: DiscreteTypeId, default: &str) -> DiscreteCell {
    let default = ctx.variant_index(ty, default);
    let value_box = ctx.ir.new_box(Value::Int(default));
    let inner = ctx.ir.new_instant(Some(Kind::Int));
    ctx.ir
        .push_set(inner, value_box, Rvalue::Atom(Atom::Param(inner)));
    let gate = ctx.ir.new_instant(Some(Kind::Int));
    ctx.ir.push_if(
        gate,
        CmpOp::Ne,
        Atom::Param(gate),
        Atom::Read(value_box),
        inner,
        Some(Atom::Param(gate)),
    );
    DiscreteCell {
        output: DiscreteOutput { instant: gate, ty },
        input: DiscreteInput {
            dispatch: inner,
            ty,
            default,
        },
    }
}

// ── Internal constructors for the hardware layer ────────────────────────────

pub(crate) fn float_input_from(dispatch: InstantId, default: f64) -> FloatInput {
    FloatInput { dispatch, default }
}

pub(crate) fn boolean_input_from(dispatch: InstantId, default: bool) -> BooleanInput {
    BooleanInput { dispatch, default }
}

pub(crate) fn discrete_input_from(
    dispatch: InstantId,
    ty: DiscreteTypeId,
    default: i64,
) -> DiscreteInput {
    DiscreteInput {
        dispatch,
        ty,
        default,
    }
}

pub(crate) fn float_output_from(instant: InstantId) -> FloatOutput {
    FloatOutput { instant }
}

pub(crate) fn boolean_output_from(instant: InstantId) -> BooleanOutput {
    BooleanOutput { instant }
}

// ── Tests ──────────────────────────────────────────────────────────────────
