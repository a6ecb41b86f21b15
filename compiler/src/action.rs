// action.rs — Timed action sequences
//
// Sequencing on top of the algebra: a snapshot is "the moment this step
// begins" plus a cancellation condition, and each wait derives the next
// snapshot from the previous one. Everything compiles down to cells,
// one-shot timers, and edge detection; there is no sequencer in the
// generated program.

use crate::channel::{boolean_cell, event_cell, BooleanInput, BooleanOutput, EventInput, FloatOutput};
use crate::context::Context;
use crate::timer;

/// One point in a sequence: a begin trigger and the cancel condition.
#[derive(Clone, Copy)]
pub struct Snapshot {
    begin: EventInput,
    cancel: BooleanInput,
}

impl Snapshot {
    pub fn new(begin: EventInput, cancel: BooleanInput) -> Snapshot {
        Snapshot { begin, cancel }
    }

    /// Write a float value when this step begins.
    pub fn set_float(&self, ctx: &mut Context, target: FloatOutput, value: f64) {
        let event = target.set_event(ctx, value);
        self.begin.send(ctx, event);
    }

    /// Write a boolean value when this step begins.
    pub fn set_boolean(&self, ctx: &mut Context, target: BooleanOutput, value: bool) {
        let event = target.set_event(ctx, value);
        self.begin.send(ctx, event);
    }

    /// A trigger firing `millis` after this step begins.
    pub fn after_ms(&self, ctx: &mut Context, millis: u32) -> EventInput {
        timer::after_ms(ctx, self.begin, millis)
    }

    pub fn defer_ms(&self, ctx: &mut Context, millis: u32) -> Snapshot {
        Snapshot {
            begin: self.after_ms(ctx, millis),
            cancel: self.cancel,
        }
    }

    /// A trigger firing once `condition` first holds after this step began.
    /// Cancellation disarms the wait.
    pub fn and_then(&self, ctx: &mut Context, condition: BooleanInput) -> EventInput {
        let mut waiting = boolean_cell(ctx, false);
        let (end_out, end_in) = event_cell(ctx);

        let arm = waiting.set_true(ctx);
        self.begin.send(ctx, arm);
        let disarm = waiting.set_false(ctx);
        let cancel_press = self.cancel.press(ctx);
        cancel_press.send(ctx, disarm);
        end_in.send(ctx, disarm);

        let ready = waiting.input.and(ctx, condition);
        let fire = ready.press(ctx);
        fire.send(ctx, end_out);
        end_in
    }

    pub fn defer_until(&self, ctx: &mut Context, condition: BooleanInput) -> Snapshot {
        Snapshot {
            begin: self.and_then(ctx, condition),
            cancel: self.cancel,
        }
    }
}

/// A sequence under construction; each wait advances the snapshot.
pub struct ActionSeq {
    snapshot: Snapshot,
}

impl ActionSeq {
    pub fn set_float(&mut self, ctx: &mut Context, target: FloatOutput, value: f64) {
        self.snapshot.set_float(ctx, target, value);
    }

    pub fn set_boolean(&mut self, ctx: &mut Context, target: BooleanOutput, value: bool) {
        self.snapshot.set_boolean(ctx, target, value);
    }

    pub fn wait_ms(&mut self, ctx: &mut Context, millis: u32) {
        self.snapshot = self.snapshot.defer_ms(ctx, millis);
    }

    pub fn wait_until(&mut self, ctx: &mut Context, condition: BooleanInput) {
        self.snapshot = self.snapshot.defer_until(ctx, condition);
    }
}

/// Build a sequence that starts whenever `should_run` turns true and is
/// cancelled when it turns false again.
pub fn run_while<F>(ctx: &mut Context, should_run: BooleanInput, build: F)
where
    F: FnOnce(&mut Context, &mut ActionSeq),
{
    let cancel = should_run.invert(ctx);
    let begin = should_run.press(ctx);
    let mut seq = ActionSeq {
        snapshot: Snapshot::new(begin, cancel),
    };
    build(ctx, &mut seq);
}
