// timer.rs — Periodic tickers and one-shot delays
//
// Both primitives take a `void (*)(void)` callback on the runtime side, so
// they surface here as trigger inputs. Tickers are cached per period: two
// subsystems asking for a 20ms tick share one registration.

use crate::channel::{event_cell, EventInput};
use crate::context::{Context, Phase};
use crate::ir::{Atom, Value};

// uint32_t nanoseconds on the runtime side
const MAX_MILLIS: u32 = 4_294;

fn period_ns(millis: u32) -> i64 {
    assert!(millis > 0, "timer period must be positive");
    assert!(
        millis <= MAX_MILLIS,
        "timer period {}ms exceeds the 32-bit nanosecond range",
        millis
    );
    i64::from(millis) * 1_000_000
}

/// A trigger firing every `millis` milliseconds, registered before the run
/// loop starts. Cached: repeated requests for the same period share one
/// underlying timer.
pub fn ticker(ctx: &mut Context, millis: u32) -> EventInput {
    if let Some(&cached) = ctx.tickers.get(&millis) {
        return cached;
    }
    let ns = period_ns(millis);
    let (out, input) = event_cell(ctx);
    ctx.add_init_call(
        Phase::Begin,
        "start_timer_ns",
        vec![Atom::Lit(Value::Int(ns)), Atom::Callback(out.instant)],
    );
    ctx.needs_timer_thread = true;
    ctx.tickers.insert(millis, input);
    input
}

/// A trigger firing once, `millis` milliseconds after `event` fires. The
/// delay is armed at event time, not at startup.
pub fn after_ms(ctx: &mut Context, event: EventInput, millis: u32) -> EventInput {
    let ns = period_ns(millis);
    let (out, input) = event_cell(ctx);
    let ext = ctx.catalog.expect("run_after_ns").clone();
    ctx.ir.push_call_external(
        event.dispatch,
        &ext,
        vec![Atom::Lit(Value::Int(ns)), Atom::Callback(out.instant)],
        None,
    );
    ctx.needs_timer_thread = true;
    input
}
