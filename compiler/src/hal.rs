// hal.rs — Hardware-facing port surface
//
// Wires devices into the channel algebra without knowing anything about how
// they work: every device is a catalog name with typed push, pull, and
// registration primitives. Polled inputs sample on a trigger (a shared
// ticker or the driver-station update); interrupt inputs sample inside the
// registered callback so the registration primitive keeps its plain
// `void (*)(void)` shape.
//
// Channel allocations are tracked host-side; claiming the same PWM channel
// or GPIO pin twice is a description error and fails immediately.

use crate::channel::{
    self, boolean_cell, event_cell, BooleanInput, BooleanOutput, DiscreteInput, EventInput,
    FloatInput, FloatOutput,
};
use crate::context::{Context, DiscreteTypeId, Phase};
use crate::ir::{Atom, Kind, Value};
use crate::timer;

pub const JOYSTICK_COUNT: usize = 6;
pub const AXIS_COUNT: usize = 12;
pub const BUTTON_COUNT: usize = 32;
pub const PWM_COUNT: usize = 20;
pub const GPIO_COUNT: usize = 10;
pub const INTERRUPT_COUNT: usize = 8;
pub const SOLENOID_COUNT: usize = 8;

/// Polling period for inputs without interrupt support.
const GPIO_POLL_MS: u32 = 20;

// ── Typed poll/push wiring ──────────────────────────────────────────────────

/// Sample a float-returning pull primitive every time `event` fires.
pub fn poll_float(
    ctx: &mut Context,
    event: EventInput,
    func: &str,
    args: &[Value],
    default: f64,
) -> FloatInput {
    let ext = ctx.catalog.expect(func).clone();
    let out = ctx.ir.new_instant(Some(Kind::Float));
    let atoms = args.iter().map(|v| Atom::Lit(*v)).collect();
    ctx.ir.push_call_external(event.dispatch, &ext, atoms, Some(out));
    channel::float_input_from(out, default)
}

/// Sample a bool-returning pull primitive every time `event` fires.
pub fn poll_boolean(
    ctx: &mut Context,
    event: EventInput,
    func: &str,
    args: &[Value],
    default: bool,
) -> BooleanInput {
    let ext = ctx.catalog.expect(func).clone();
    let out = ctx.ir.new_instant(Some(Kind::Bool));
    let atoms = args.iter().map(|v| Atom::Lit(*v)).collect();
    ctx.ir.push_call_external(event.dispatch, &ext, atoms, Some(out));
    channel::boolean_input_from(out, default)
}

/// Sample an int-returning pull primitive into a discrete input.
pub fn poll_discrete(
    ctx: &mut Context,
    event: EventInput,
    func: &str,
    args: &[Value],
    ty: DiscreteTypeId,
    default: &str,
) -> DiscreteInput {
    let default = ctx.variant_index(ty, default);
    let ext = ctx.catalog.expect(func).clone();
    let out = ctx.ir.new_instant(Some(Kind::Int));
    let atoms = args.iter().map(|v| Atom::Lit(*v)).collect();
    ctx.ir.push_call_external(event.dispatch, &ext, atoms, Some(out));
    channel::discrete_input_from(out, ty, default)
}

/// An output that hands each value to a push primitive:
/// `func(value, *extra)`.
pub fn push_float(ctx: &mut Context, func: &str, extra: &[Value]) -> FloatOutput {
    let ext = ctx.catalog.expect(func).clone();
    let instant = ctx.ir.new_instant(Some(Kind::Float));
    let mut atoms = vec![Atom::Param(instant)];
    atoms.extend(extra.iter().map(|v| Atom::Lit(*v)));
    ctx.ir.push_call_external(instant, &ext, atoms, None);
    channel::float_output_from(instant)
}

pub fn push_boolean(ctx: &mut Context, func: &str, extra: &[Value]) -> BooleanOutput {
    let ext = ctx.catalog.expect(func).clone();
    let instant = ctx.ir.new_instant(Some(Kind::Bool));
    let mut atoms = vec![Atom::Param(instant)];
    atoms.extend(extra.iter().map(|v| Atom::Lit(*v)));
    ctx.ir.push_call_external(instant, &ext, atoms, None);
    channel::boolean_output_from(instant)
}

// ── Speed controller calibration ────────────────────────────────────────────

/// Pulse-width calibration of a PWM speed controller, all in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct SpeedControllerSpec {
    pub rev_max: f64,
    pub rev_min: f64,
    pub center: f64,
    pub fwd_min: f64,
    pub fwd_max: f64,
    pub frequency_hz: f64,
}

pub const TALON_SR: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.989,
    rev_min: 1.487,
    center: 1.513,
    fwd_min: 1.539,
    fwd_max: 2.037,
    frequency_hz: 200.0,
};

pub const JAGUAR: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.697,
    rev_min: 1.454,
    center: 1.507,
    fwd_min: 1.55,
    fwd_max: 2.31,
    frequency_hz: 198.0,
};

pub const VICTOR_OLD: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 1.026,
    rev_min: 1.49,
    center: 1.507,
    fwd_min: 1.525,
    fwd_max: 2.027,
    frequency_hz: 100.0,
};

pub const SERVO: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.6,
    rev_min: 1.6,
    center: 1.6,
    fwd_min: 1.6,
    fwd_max: 2.6,
    frequency_hz: 50.0,
};

pub const VICTOR_SP: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.997,
    rev_min: 1.48,
    center: 1.5,
    fwd_min: 1.52,
    fwd_max: 2.004,
    frequency_hz: 200.0,
};

pub const SPARK: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.999,
    rev_min: 1.46,
    center: 1.5,
    fwd_min: 1.55,
    fwd_max: 2.003,
    frequency_hz: 200.0,
};

pub const SD540: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.94,
    rev_min: 1.44,
    center: 1.5,
    fwd_min: 1.55,
    fwd_max: 2.05,
    frequency_hz: 200.0,
};

pub const TALON_SRX: SpeedControllerSpec = SpeedControllerSpec {
    rev_max: 0.997,
    rev_min: 1.48,
    center: 1.5,
    fwd_min: 1.52,
    fwd_max: 2.004,
    frequency_hz: 200.0,
};

/// PWM period squelching supported by the generator hardware.
fn frequency_to_squelch(frequency_hz: f64) -> i64 {
    assert!(frequency_hz > 0.0, "PWM frequency must be positive");
    if frequency_hz >= 133.0 {
        0 // no squelching: 198 Hz
    } else if frequency_hz >= 67.0 {
        1 // half squelching: 99 Hz
    } else {
        3 // full squelching: 49.5 Hz
    }
}

// ── Control board surface ───────────────────────────────────────────────────

/// The control board: driver station, PWM bank, GPIO bank, pneumatics.
pub struct Controller {
    pub driver_station: DriverStation,
    pub pwm: PwmBank,
    pub gpio: GpioBank,
    pub pcm: Pcm,
}

impl Controller {
    pub fn new(ctx: &mut Context) -> Controller {
        Controller {
            driver_station: DriverStation::new(ctx),
            pwm: PwmBank::new(),
            gpio: GpioBank::new(),
            pcm: Pcm::new(0),
        }
    }
}

// ── Driver station ──────────────────────────────────────────────────────────

pub struct DriverStation {
    update: EventInput,
    joysticks: Vec<Joystick>,
    mode_type: DiscreteTypeId,
    mode: Option<DiscreteInput>,
}

impl DriverStation {
    fn new(ctx: &mut Context) -> DriverStation {
        let (update_out, update) = event_cell(ctx);
        ctx.add_init_call(Phase::InitIo, "ds_init", vec![]);
        ctx.add_init_call(
            Phase::Begin,
            "ds_begin",
            vec![Atom::Callback(update_out.instant)],
        );
        let mode_type = ctx.discrete_type(&["DISABLED", "AUTONOMOUS", "TELEOP", "TESTING"]);
        let joysticks = (0..JOYSTICK_COUNT)
            .map(|i| Joystick::new(i as i64, update))
            .collect();
        DriverStation {
            update,
            joysticks,
            mode_type,
            mode: None,
        }
    }

    /// Fires on every driver-station packet.
    pub fn update_event(&self) -> EventInput {
        self.update
    }

    /// 1-indexed, matching the station display.
    pub fn joystick(&mut self, number: usize) -> &mut Joystick {
        assert!(
            (1..=JOYSTICK_COUNT).contains(&number),
            "joystick {} out of range 1..={}",
            number,
            JOYSTICK_COUNT
        );
        &mut self.joysticks[number - 1]
    }

    /// Current robot mode, sampled on every driver-station packet.
    pub fn mode(&mut self, ctx: &mut Context) -> DiscreteInput {
        if let Some(mode) = self.mode {
            return mode;
        }
        let mode = poll_discrete(
            ctx,
            self.update,
            "get_robot_mode",
            &[],
            self.mode_type,
            "DISABLED",
        );
        self.mode = Some(mode);
        mode
    }

    /// True while the robot is in the named mode.
    pub fn is_mode(&mut self, ctx: &mut Context, mode: &str) -> BooleanInput {
        self.mode(ctx).is_value(ctx, mode)
    }
}

pub struct Joystick {
    index: i64,
    update: EventInput,
    axes: [Option<FloatInput>; AXIS_COUNT],
    buttons: [Option<BooleanInput>; BUTTON_COUNT],
}

impl Joystick {
    fn new(index: i64, update: EventInput) -> Joystick {
        Joystick {
            index,
            update,
            axes: [None; AXIS_COUNT],
            buttons: [None; BUTTON_COUNT],
        }
    }

    /// 1-indexed axis, sampled on every driver-station packet. Cached.
    pub fn axis(&mut self, ctx: &mut Context, number: usize) -> FloatInput {
        assert!(
            (1..=AXIS_COUNT).contains(&number),
            "axis {} out of range 1..={}",
            number,
            AXIS_COUNT
        );
        let slot = number - 1;
        if let Some(input) = self.axes[slot] {
            return input;
        }
        let input = poll_float(
            ctx,
            self.update,
            "get_joystick_axis",
            &[Value::Int(self.index), Value::Int(slot as i64)],
            0.0,
        );
        self.axes[slot] = Some(input);
        input
    }

    /// 1-indexed button, sampled on every driver-station packet. Cached.
    pub fn button(&mut self, ctx: &mut Context, number: usize) -> BooleanInput {
        assert!(
            (1..=BUTTON_COUNT).contains(&number),
            "button {} out of range 1..={}",
            number,
            BUTTON_COUNT
        );
        let slot = number - 1;
        if let Some(input) = self.buttons[slot] {
            return input;
        }
        let input = poll_boolean(
            ctx,
            self.update,
            "get_joystick_button",
            &[Value::Int(self.index), Value::Int(slot as i64)],
            false,
        );
        self.buttons[slot] = Some(input);
        input
    }
}

// ── PWM ─────────────────────────────────────────────────────────────────────

pub struct PwmBank {
    assigned: [bool; PWM_COUNT],
}

impl PwmBank {
    fn new() -> PwmBank {
        PwmBank {
            assigned: [false; PWM_COUNT],
        }
    }

    fn claim(&mut self, pwm_id: usize) {
        assert!(pwm_id < PWM_COUNT, "PWM channel {} out of range", pwm_id);
        assert!(!self.assigned[pwm_id], "PWM channel {} already claimed", pwm_id);
        self.assigned[pwm_id] = true;
    }

    /// Raw pulse-width output in milliseconds.
    pub fn raw(
        &mut self,
        ctx: &mut Context,
        pwm_id: usize,
        frequency_hz: f64,
        latch_pwm_zero: bool,
    ) -> FloatOutput {
        self.claim(pwm_id);
        let squelch = frequency_to_squelch(frequency_hz);
        ctx.add_init_call(
            Phase::InitIo,
            "pwm_init",
            vec![
                Atom::Lit(Value::Int(pwm_id as i64)),
                Atom::Lit(Value::Int(squelch)),
                Atom::Lit(Value::Bool(latch_pwm_zero)),
            ],
        );
        push_float(ctx, "pwm_update", &[Value::Int(pwm_id as i64)])
    }

    /// Speed-fraction output in [-1, 1], mapped to pulse widths through the
    /// controller's calibration.
    pub fn controller(
        &mut self,
        ctx: &mut Context,
        pwm_id: usize,
        spec: SpeedControllerSpec,
        latch_pwm_zero: bool,
    ) -> FloatOutput {
        let raw = self.raw(ctx, pwm_id, spec.frequency_hz, latch_pwm_zero);
        let stage = ctx.ir.new_instant(Some(Kind::Float));
        let ext = ctx.catalog.expect("pwm_map").clone();
        ctx.ir.push_call_external(
            stage,
            &ext,
            vec![
                Atom::Param(stage),
                Atom::Lit(Value::Float(spec.rev_max)),
                Atom::Lit(Value::Float(spec.rev_min)),
                Atom::Lit(Value::Float(spec.center)),
                Atom::Lit(Value::Float(spec.fwd_min)),
                Atom::Lit(Value::Float(spec.fwd_max)),
            ],
            Some(raw.instant),
        );
        channel::float_output_from(stage)
    }

    pub fn talon_sr(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, TALON_SR, false)
    }

    pub fn jaguar(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, JAGUAR, false)
    }

    pub fn victor_old(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, VICTOR_OLD, false)
    }

    pub fn victor_sp(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, VICTOR_SP, false)
    }

    pub fn spark(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, SPARK, false)
    }

    pub fn sd540(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, SD540, false)
    }

    pub fn talon_srx(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, TALON_SRX, false)
    }

    pub fn servo(&mut self, ctx: &mut Context, pwm_id: usize) -> FloatOutput {
        self.controller(ctx, pwm_id, SERVO, true)
    }
}

// ── GPIO ────────────────────────────────────────────────────────────────────

pub struct GpioBank {
    assigned: [bool; GPIO_COUNT],
    next_interrupt: usize,
}

impl GpioBank {
    fn new() -> GpioBank {
        GpioBank {
            assigned: [false; GPIO_COUNT],
            next_interrupt: 0,
        }
    }

    /// A digital input pin. With `interrupt`, the pin is sampled inside an
    /// interrupt callback and changes arrive immediately; otherwise the pin
    /// is polled on the shared ticker.
    pub fn input(&mut self, ctx: &mut Context, pin: usize, interrupt: bool) -> BooleanInput {
        assert!(pin < GPIO_COUNT, "GPIO pin {} out of range", pin);
        assert!(!self.assigned[pin], "GPIO pin {} already claimed", pin);
        self.assigned[pin] = true;

        if interrupt {
            assert!(
                self.next_interrupt < INTERRUPT_COUNT,
                "too many interrupts allocated; only {} GPIO inputs can use interrupts",
                INTERRUPT_COUNT
            );
            let irq = self.next_interrupt as i64;
            self.next_interrupt += 1;
            ctx.add_init_call(
                Phase::InitIo,
                "gpio_init_input_interrupt",
                vec![Atom::Lit(Value::Int(pin as i64)), Atom::Lit(Value::Int(irq))],
            );
            let cell = boolean_cell(ctx, false);
            let sample = ctx.ir.new_instant(None);
            let pull = ctx.catalog.expect("gpio_poll_input").clone();
            ctx.ir.push_call_external(
                sample,
                &pull,
                vec![Atom::Lit(Value::Int(pin as i64))],
                Some(cell.output.instant),
            );
            ctx.add_init_call(
                Phase::Begin,
                "gpio_start_interrupt",
                vec![
                    Atom::Lit(Value::Int(pin as i64)),
                    Atom::Lit(Value::Int(irq)),
                    Atom::Callback(sample),
                ],
            );
            cell.input
        } else {
            ctx.add_init_call(
                Phase::InitIo,
                "gpio_init_input_poll",
                vec![Atom::Lit(Value::Int(pin as i64))],
            );
            let tick = timer::ticker(ctx, GPIO_POLL_MS);
            poll_boolean(
                ctx,
                tick,
                "gpio_poll_input",
                &[Value::Int(pin as i64)],
                false,
            )
        }
    }
}

// ── Pneumatics ──────────────────────────────────────────────────────────────

pub struct Pcm {
    id: i64,
    assigned: [bool; SOLENOID_COUNT],
}

impl Pcm {
    fn new(id: i64) -> Pcm {
        Pcm {
            id,
            assigned: [false; SOLENOID_COUNT],
        }
    }

    pub fn solenoid(&mut self, ctx: &mut Context, solenoid_id: usize) -> BooleanOutput {
        assert!(
            solenoid_id < SOLENOID_COUNT,
            "solenoid {} out of range",
            solenoid_id
        );
        assert!(
            !self.assigned[solenoid_id],
            "solenoid {} already claimed",
            solenoid_id
        );
        self.assigned[solenoid_id] = true;
        ctx.add_init_call(
            Phase::InitIo,
            "solenoid_init",
            vec![
                Atom::Lit(Value::Int(self.id)),
                Atom::Lit(Value::Int(solenoid_id as i64)),
            ],
        );
        push_boolean(
            ctx,
            "solenoid_update",
            &[Value::Int(self.id), Value::Int(solenoid_id as i64)],
        )
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squelch_tiers_match_generator_frequencies() {
        assert_eq!(frequency_to_squelch(200.0), 0);
        assert_eq!(frequency_to_squelch(133.0), 0);
        assert_eq!(frequency_to_squelch(100.0), 1);
        assert_eq!(frequency_to_squelch(50.0), 3);
    }

    #[test]
    fn joystick_inputs_are_cached() {
        let mut ctx = Context::new();
        let mut board = Controller::new(&mut ctx);
        let before = ctx.ir.instant_count();
        let a1 = board.driver_station.joystick(1).axis(&mut ctx, 2);
        let grown = ctx.ir.instant_count();
        let a2 = board.driver_station.joystick(1).axis(&mut ctx, 2);
        assert!(grown > before);
        assert_eq!(grown, ctx.ir.instant_count());
        assert_eq!(a1.dispatch, a2.dispatch);
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn double_pwm_claim_is_fatal() {
        let mut ctx = Context::new();
        let mut board = Controller::new(&mut ctx);
        board.pwm.talon_sr(&mut ctx, 3);
        board.pwm.spark(&mut ctx, 3);
    }

    #[test]
    #[should_panic(expected = "too many interrupts")]
    fn interrupt_exhaustion_is_fatal() {
        let mut ctx = Context::new();
        let mut board = Controller::new(&mut ctx);
        for pin in 0..=INTERRUPT_COUNT {
            board.gpio.input(&mut ctx, pin, true);
        }
    }

    #[test]
    fn mode_input_is_cached() {
        let mut ctx = Context::new();
        let mut board = Controller::new(&mut ctx);
        let m1 = board.driver_station.mode(&mut ctx);
        let m2 = board.driver_station.mode(&mut ctx);
        assert_eq!(m1.dispatch, m2.dispatch);
        let auto = board.driver_station.is_mode(&mut ctx, "AUTONOMOUS");
        assert!(!auto.default_value());
    }
}
