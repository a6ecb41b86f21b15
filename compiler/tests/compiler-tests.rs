// Behavioral conformance tests for rcc.
//
// Built on the library API plus the IR interpreter in common/: describe a
// program, lower it, then drive the optimized graph by firing registered
// callbacks and observing device pushes.

mod common;

use std::collections::BTreeMap;

use common::Interp;
use rcc::action;
use rcc::channel::{always_float, boolean_cell, choose};
use rcc::context::Context;
use rcc::hal;
use rcc::id::InstantId;
use rcc::ir::{Atom, Invocation, Op, Rvalue, Value};
use rcc::codegen::CodegenOptions;
use rcc::pipeline::{self, LoweredProgram};
use rcc::timer;

fn lowered(build: impl FnOnce(&mut Context)) -> LoweredProgram {
    let mut ctx = Context::new();
    build(&mut ctx);
    pipeline::lower(ctx)
}

fn emitted(build: impl FnOnce(&mut Context)) -> String {
    let low = lowered(build);
    pipeline::emit(&low, &CodegenOptions::default()).c_source
}

// ── Default propagation ─────────────────────────────────────────────────────

#[test]
fn default_propagation_through_filter_chain() {
    let mut ctx = Context::new();
    let wide = always_float(&mut ctx, 5.0).deadzone(&mut ctx, 1.0);
    assert_eq!(wide.default_value(), 5.0);
    let narrow = always_float(&mut ctx, 0.5).deadzone(&mut ctx, 1.0);
    assert_eq!(narrow.default_value(), 0.0);

    // each stage applies in order to the initial default
    let chained = always_float(&mut ctx, 2.0)
        .scale(&mut ctx, 0.5)
        .deadzone(&mut ctx, 1.0)
        .negate(&mut ctx);
    assert_eq!(chained.default_value(), -1.0);
}

#[test]
fn division_by_zero_follows_ieee754() {
    let mut ctx = Context::new();
    let zero = always_float(&mut ctx, 0.0);
    assert!(always_float(&mut ctx, 0.0)
        .div(&mut ctx, zero)
        .default_value()
        .is_nan());
    assert_eq!(
        always_float(&mut ctx, 3.0).div(&mut ctx, zero).default_value(),
        f64::INFINITY
    );
    assert_eq!(
        always_float(&mut ctx, -3.0).div(&mut ctx, zero).default_value(),
        f64::NEG_INFINITY
    );
}

// ── Edge detection ──────────────────────────────────────────────────────────

#[test]
fn edge_detection_fires_once_per_transition() {
    let low = lowered(|ctx| {
        let tick = timer::ticker(ctx, 20);
        let button = hal::poll_boolean(ctx, tick, "gpio_poll_input", &[Value::Int(0)], false);
        let press = button.press(ctx);
        let release = button.release(ctx);
        let press_counter = hal::push_boolean(ctx, "solenoid_update", &[Value::Int(0), Value::Int(0)]);
        let release_counter =
            hal::push_boolean(ctx, "solenoid_update", &[Value::Int(0), Value::Int(1)]);
        let on_press = press_counter.set_event(ctx, true);
        press.send(ctx, on_press);
        let on_release = release_counter.set_event(ctx, true);
        release.send(ctx, on_release);
    });

    let mut interp = Interp::new(&low);
    interp.run_root();
    let tick = interp.periodic_callback();

    let count = |i: &Interp, slot: i64| {
        i.pushes_of("solenoid_update")
            .iter()
            .filter(|args| args[2] == Value::Int(slot))
            .count()
    };

    // repeated identical values fire nothing
    interp.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(false));
    interp.fire(tick);
    interp.fire(tick);
    assert_eq!(count(&interp, 0), 0);
    assert_eq!(count(&interp, 1), 0);

    // one transition, one trigger
    interp.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(true));
    interp.fire(tick);
    assert_eq!(count(&interp, 0), 1);
    interp.fire(tick);
    assert_eq!(count(&interp, 0), 1);

    interp.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(false));
    interp.fire(tick);
    assert_eq!(count(&interp, 0), 1);
    assert_eq!(count(&interp, 1), 1);
}

// ── Toggle cell scenario ────────────────────────────────────────────────────

fn toggle_program(ctx: &mut Context) {
    let tick = timer::ticker(ctx, 20);
    let button = hal::poll_boolean(ctx, tick, "gpio_poll_input", &[Value::Int(0)], false);
    let press = button.press(ctx);
    let mut state = boolean_cell(ctx, false);
    let toggle = state.toggle(ctx);
    toggle.when(ctx, press);
    let lamp = hal::push_boolean(ctx, "solenoid_update", &[Value::Int(0), Value::Int(0)]);
    state.input.send(ctx, lamp);
}

#[test]
fn toggle_cell_odd_press_count_flips_even_restores() {
    let low = lowered(toggle_program);
    let mut interp = Interp::new(&low);
    interp.run_root();
    let tick = interp.periodic_callback();

    let mut press_once = |i: &mut Interp| {
        i.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(true));
        i.fire(tick);
        i.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(false));
        i.fire(tick);
    };

    press_once(&mut interp);
    press_once(&mut interp);
    press_once(&mut interp);
    let after_odd = interp.pushes_of("solenoid_update");
    assert_eq!(
        after_odd.last().unwrap()[0],
        Value::Bool(true),
        "odd number of presses leaves a false-initialized cell true"
    );
    assert_eq!(after_odd.len(), 3, "each toggle dispatches exactly once");

    press_once(&mut interp);
    let after_even = interp.pushes_of("solenoid_update");
    assert_eq!(after_even.last().unwrap()[0], Value::Bool(false));
    assert_eq!(after_even.len(), 4);
}

// ── Ramping ─────────────────────────────────────────────────────────────────

#[test]
fn ramping_steps_toward_target_per_tick() {
    let low = lowered(|ctx| {
        let tick = timer::ticker(ctx, 20);
        let axis = hal::poll_float(
            ctx,
            tick,
            "get_joystick_axis",
            &[Value::Int(0), Value::Int(0)],
            0.0,
        );
        // 5.0/s at 20ms is 0.1 per tick
        let ramped = axis.with_ramping(ctx, 5.0, 20);
        let motor = hal::push_float(ctx, "pwm_update", &[Value::Int(7)]);
        ramped.send(ctx, motor);
    });

    let mut interp = Interp::new(&low);
    interp.run_root();
    let tick = interp.periodic_callback();

    interp.set_pull(
        "get_joystick_axis",
        &[Value::Int(0), Value::Int(0)],
        Value::Float(1.0),
    );
    interp.fire(tick);
    interp.fire(tick);
    interp.fire(tick);
    let pushes = interp.pushes_of("pwm_update");
    let values: Vec<Value> = pushes.iter().map(|args| args[0]).collect();
    assert_eq!(
        values,
        vec![
            Value::Float(0.1),
            Value::Float(0.2),
            Value::Float(0.30000000000000004),
        ]
    );
}

// ── Multiplexing ────────────────────────────────────────────────────────────

#[test]
fn choose_recomputes_on_any_upstream_update() {
    let low = lowered(|ctx| {
        let tick = timer::ticker(ctx, 20);
        let cond = hal::poll_boolean(ctx, tick, "gpio_poll_input", &[Value::Int(2)], false);
        let a = hal::poll_float(
            ctx,
            tick,
            "get_joystick_axis",
            &[Value::Int(0), Value::Int(0)],
            0.0,
        );
        let b = hal::poll_float(
            ctx,
            tick,
            "get_joystick_axis",
            &[Value::Int(0), Value::Int(1)],
            0.0,
        );
        let muxed = choose(ctx, cond, a, b);
        let motor = hal::push_float(ctx, "pwm_update", &[Value::Int(5)]);
        muxed.send(ctx, motor);
    });

    let mut interp = Interp::new(&low);
    interp.run_root();
    let tick = interp.periodic_callback();

    interp.set_pull("gpio_poll_input", &[Value::Int(2)], Value::Bool(false));
    interp.set_pull(
        "get_joystick_axis",
        &[Value::Int(0), Value::Int(0)],
        Value::Float(0.3),
    );
    interp.set_pull(
        "get_joystick_axis",
        &[Value::Int(0), Value::Int(1)],
        Value::Float(0.7),
    );
    interp.fire(tick);
    let last = interp.pushes_of("pwm_update").last().unwrap().clone();
    assert_eq!(last[0], Value::Float(0.7), "false condition selects the second branch");

    interp.set_pull("gpio_poll_input", &[Value::Int(2)], Value::Bool(true));
    interp.fire(tick);
    let last = interp.pushes_of("pwm_update").last().unwrap().clone();
    assert_eq!(last[0], Value::Float(0.3), "true condition selects the first branch");
}

// ── Interrupt wiring ────────────────────────────────────────────────────────

#[test]
fn interrupt_input_samples_inside_the_callback() {
    let low = lowered(|ctx| {
        let mut board = hal::Controller::new(ctx);
        let sensor = board.gpio.input(ctx, 1, true);
        let lamp = board.pcm.solenoid(ctx, 0);
        sensor.send(ctx, lamp);
    });

    let mut interp = Interp::new(&low);
    interp.run_root();
    assert_eq!(
        interp.pushes_of("gpio_init_input_interrupt"),
        vec![vec![Value::Int(1), Value::Int(0)]]
    );

    let isr = interp.registered_callback("gpio_start_interrupt");
    interp.set_pull("gpio_poll_input", &[Value::Int(1)], Value::Bool(true));
    interp.fire(isr);
    let pushes = interp.pushes_of("solenoid_update");
    assert_eq!(pushes, vec![vec![Value::Bool(true), Value::Int(0), Value::Int(0)]]);

    // the cell gates repeats
    interp.fire(isr);
    assert_eq!(interp.pushes_of("solenoid_update").len(), 1);
}

// ── Action sequences ────────────────────────────────────────────────────────

#[test]
fn action_sequence_walks_through_waits() {
    let low = lowered(|ctx| {
        let tick = timer::ticker(ctx, 20);
        let running = hal::poll_boolean(ctx, tick, "gpio_poll_input", &[Value::Int(0)], false);
        let sensor = hal::poll_boolean(ctx, tick, "gpio_poll_input", &[Value::Int(1)], false);
        let motor = hal::push_float(ctx, "pwm_update", &[Value::Int(0)]);
        action::run_while(ctx, running, |ctx, seq| {
            seq.set_float(ctx, motor, 0.5);
            seq.wait_ms(ctx, 500);
            seq.wait_until(ctx, sensor);
            seq.set_float(ctx, motor, 0.0);
        });
    });

    let mut interp = Interp::new(&low);
    interp.run_root();
    let tick = interp.periodic_callback();

    interp.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(false));
    interp.set_pull("gpio_poll_input", &[Value::Int(1)], Value::Bool(false));
    interp.fire(tick);
    assert!(interp.pushes_of("pwm_update").is_empty());

    // sequence begins: first set fires, the 500ms delay arms
    interp.set_pull("gpio_poll_input", &[Value::Int(0)], Value::Bool(true));
    interp.fire(tick);
    assert_eq!(
        interp.pushes_of("pwm_update"),
        vec![vec![Value::Float(0.5), Value::Int(0)]]
    );
    assert_eq!(interp.one_shots.len(), 1);
    assert_eq!(interp.one_shots[0].0, 500_000_000);

    // delay elapses; now waiting on the sensor
    interp.fire_one_shots();
    assert_eq!(interp.pushes_of("pwm_update").len(), 1);

    interp.set_pull("gpio_poll_input", &[Value::Int(1)], Value::Bool(true));
    interp.fire(tick);
    let pushes = interp.pushes_of("pwm_update");
    assert_eq!(pushes.last().unwrap()[0], Value::Float(0.0));
    assert_eq!(pushes.len(), 2);
}

// ── Reachability ────────────────────────────────────────────────────────────

#[test]
fn unreachable_combinators_are_absent_from_the_artifact() {
    let code = emitted(|ctx| {
        let tick = timer::ticker(ctx, 20);
        let live = hal::poll_float(
            ctx,
            tick,
            "get_joystick_axis",
            &[Value::Int(0), Value::Int(0)],
            0.0,
        );
        let motor = hal::push_float(ctx, "pwm_update", &[Value::Int(0)]);
        live.send(ctx, motor);

        // fully described, never connected to anything reachable
        let dead = always_float(ctx, 1.0).deadzone(ctx, 0.25);
        let orphan = hal::push_float(ctx, "pwm_update", &[Value::Int(9)]);
        dead.send(ctx, orphan);
    });
    assert!(code.contains("get_joystick_axis"));
    assert!(!code.contains("deadzone"), "dead filter chain must not be emitted");
}

// ── Inlining safety ─────────────────────────────────────────────────────────

/// Count reference sites per live instant, split into plain top-level call
/// sites and other references (conditional arms, callback slots).
fn reference_profile(low: &LoweredProgram) -> BTreeMap<InstantId, (usize, usize)> {
    let mut profile: BTreeMap<InstantId, (usize, usize)> =
        low.live.iter().map(|&id| (id, (0, 0))).collect();
    for &id in &low.live {
        for op in &low.graph.instant(id).body {
            let mut all = Vec::new();
            rcc::ir::IrGraph::op_references(op, &mut all);
            let direct: Option<InstantId> = match op {
                Op::Invoke { target, .. } => Some(*target),
                _ => None,
            };
            for r in all {
                let slot = profile.get_mut(&r).expect("reference to live instant");
                if Some(r) == direct {
                    slot.0 += 1;
                } else {
                    slot.1 += 1;
                }
            }
        }
    }
    profile
}

#[test]
fn no_single_reference_collision_free_instant_survives() {
    let low = lowered(|ctx| {
        toggle_program(ctx);
        let tick = timer::ticker(ctx, 20);
        let axis = hal::poll_float(
            ctx,
            tick,
            "get_joystick_axis",
            &[Value::Int(0), Value::Int(1)],
            0.0,
        );
        let ramped = axis.deadzone(ctx, 0.1).with_ramping(ctx, 2.0, 20);
        let motor = hal::push_float(ctx, "pwm_update", &[Value::Int(3)]);
        ramped.send(ctx, motor);
    });

    let profile = reference_profile(&low);
    let bypassed: Vec<InstantId> = low.stats.collision_bypasses.iter().map(|(c, _)| *c).collect();
    for (&id, &(direct, other)) in &profile {
        if id == low.root {
            continue;
        }
        let splicable = direct == 1 && other == 0;
        assert!(
            !splicable || bypassed.contains(&id),
            "instant {} survived with a single collision-free call site",
            id.0
        );
    }
}

// ── Determinism ─────────────────────────────────────────────────────────────

#[test]
fn identical_descriptions_emit_identical_bytes() {
    let first = emitted(toggle_program);
    let second = emitted(toggle_program);
    assert_eq!(first, second);
}

// ── Kind safety ─────────────────────────────────────────────────────────────

#[test]
#[should_panic(expected = "discrete enumerations differ")]
fn mismatched_discrete_enumerations_fail_at_composition() {
    let mut ctx = Context::new();
    let gears = ctx.discrete_type(&["LOW", "HIGH"]);
    let modes = ctx.discrete_type(&["DISABLED", "TELEOP"]);
    let a = rcc::channel::discrete_cell(&mut ctx, gears, "LOW");
    let b = rcc::channel::discrete_cell(&mut ctx, modes, "DISABLED");
    a.input.send(&mut ctx, b.output);
}

#[test]
#[should_panic(expected = "type mismatch")]
fn wrong_kind_external_argument_fails_at_construction() {
    let mut ctx = Context::new();
    let tick = timer::ticker(&mut ctx, 20);
    // get_joystick_axis expects two ints
    hal::poll_float(
        &mut ctx,
        tick,
        "get_joystick_axis",
        &[Value::Float(0.0), Value::Int(0)],
        0.0,
    );
}

// ── Emitted artifact structure ──────────────────────────────────────────────

#[test]
fn every_live_instant_has_one_stub_and_one_definition() {
    let low = lowered(toggle_program);
    let code = pipeline::emit(&low, &CodegenOptions::default()).c_source;
    for &id in &low.live {
        let stub_void = format!("static void instant{}(void);", id.0);
        let stub_bool = format!("static void instant{}(bool param{});", id.0, id.0);
        let stubs = code.matches(&stub_void).count() + code.matches(&stub_bool).count();
        assert_eq!(stubs, 1, "instant {} needs exactly one forward declaration", id.0);
    }
    assert_eq!(code.matches("int main()").count(), 1);
}

#[test]
fn conditional_arms_reference_live_procedures_only() {
    // every instant named in a conditional arm of the emitted graph is live
    let low = lowered(toggle_program);
    for &id in &low.live {
        for op in &low.graph.instant(id).body {
            let arms: Vec<&Invocation> = match op {
                Op::If { then, .. } => vec![then],
                Op::IfElse { then, els, .. } => vec![then, els],
                _ => continue,
            };
            for arm in arms {
                if let Invocation::Call { target, arg } = arm {
                    assert!(low.live.contains(target));
                    if let Some(Atom::Lit(_)) | Some(Atom::Param(_)) | Some(Atom::Read(_)) = arg {
                        continue;
                    }
                    assert!(arg.is_none());
                }
            }
        }
    }
    // and no plain invoke carries an external-call of a dead feed target
    for &id in &low.live {
        for op in &low.graph.instant(id).body {
            if let Op::Invoke { target, arg } = op {
                assert!(low.live.contains(target));
                if let Some(Rvalue::CallExt { .. }) = arg {
                    // feed target is the invoke target itself, already checked
                }
            }
        }
    }
}
