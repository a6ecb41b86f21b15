// drive.rs — Drivetrain wiring helpers

use crate::channel::{FloatInput, FloatOutput};
use crate::context::Context;

/// Tank drive: each stick side feeds its motor side directly.
pub fn tank_drive(
    ctx: &mut Context,
    left_in: FloatInput,
    right_in: FloatInput,
    left_out: FloatOutput,
    right_out: FloatOutput,
) {
    left_in.send(ctx, left_out);
    right_in.send(ctx, right_out);
}
