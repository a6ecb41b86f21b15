use clap::Parser;
use std::path::PathBuf;

use rcc::action;
use rcc::catalog::Catalog;
use rcc::channel::boolean_cell;
use rcc::context::Context;
use rcc::drive::tank_drive;
use rcc::hal::Controller;
use rcc::pipeline::{self, CompileOptions, Deployer, DryRunDeployer};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// The generated C source
    C,
    /// Provenance fingerprints as JSON
    BuildInfo,
    /// Compile, then hand the artifact to the deploy collaborator (dry run)
    Deploy,
}

#[derive(Parser, Debug)]
#[command(
    name = "rcc",
    version,
    about = "Reactive Channel Compiler - compiles the built-in demonstration robot to freestanding C"
)]
struct Cli {
    /// Output file path; '-' writes to stdout
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Target team number for deploys
    #[arg(long, default_value_t = 1540)]
    team: u32,

    /// Additional external-function manifest (JSON)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

/// The demonstration robot: tank drive with deadzoned sticks, a toggled
/// shifter solenoid, a ramped trigger-gated shooter, and a short autonomous
/// routine that drives until the ball sensor trips.
fn describe_demo(ctx: &mut Context, board: &mut Controller) {
    let left_stick = board
        .driver_station
        .joystick(1)
        .axis(ctx, 2)
        .deadzone(ctx, 0.1)
        .negate(ctx);
    let right_stick = board
        .driver_station
        .joystick(1)
        .axis(ctx, 6)
        .deadzone(ctx, 0.1)
        .negate(ctx);
    let right_inverted = right_stick.negate(ctx);
    let left_motor = board.pwm.talon_sr(ctx, 1);
    let right_motor = board.pwm.talon_sr(ctx, 2);
    tank_drive(ctx, left_stick, right_inverted, left_motor, right_motor);

    let mut shifter_state = boolean_cell(ctx, true);
    let shift_button = board.driver_station.joystick(1).button(ctx, 1);
    let shift_press = shift_button.press(ctx);
    let toggle = shifter_state.toggle(ctx);
    toggle.when(ctx, shift_press);
    let shifter = board.pcm.solenoid(ctx, 1);
    shifter_state.input.send(ctx, shifter);

    let throttle = board
        .driver_station
        .joystick(2)
        .axis(ctx, 2)
        .deadzone(ctx, 0.1);
    let trigger = board.driver_station.joystick(2).button(ctx, 1);
    let gate = trigger.select(ctx, 1.0, 0.0);
    let shooter_cmd = throttle.mul(ctx, gate).with_ramping(ctx, 2.0, 20);
    let shooter = board.pwm.victor_sp(ctx, 3);
    shooter_cmd.send(ctx, shooter);

    let ball_sensor = board.gpio.input(ctx, 1, true);
    let auto_mode = board.driver_station.is_mode(ctx, "AUTONOMOUS");
    action::run_while(ctx, auto_mode, |ctx, seq| {
        seq.set_float(ctx, left_motor, 0.5);
        seq.set_float(ctx, right_motor, 0.5);
        seq.wait_ms(ctx, 500);
        seq.wait_until(ctx, ball_sensor);
        seq.set_float(ctx, left_motor, 0.0);
        seq.set_float(ctx, right_motor, 0.0);
    });
}

fn write_output(path: &PathBuf, contents: &str) {
    if path.as_os_str() == "-" {
        print!("{}", contents);
        return;
    }
    if let Err(e) = std::fs::write(path, contents) {
        eprintln!("rcc: error: {}: {}", path.display(), e);
        std::process::exit(2);
    }
}

fn main() {
    let cli = Cli::parse();

    // ── Catalog ──
    let mut catalog = Catalog::builtin();
    if let Some(path) = &cli.catalog {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("rcc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        };
        match catalog.load_manifest_str(&text) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("rcc: loaded {} externals from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("rcc: error: {}", e);
                std::process::exit(2);
            }
        }
    }
    if cli.verbose {
        eprintln!("rcc: {} externals registered", catalog.len());
    }

    // ── Describe and compile ──
    let mut ctx = Context::with_catalog(catalog);
    let mut board = Controller::new(&mut ctx);
    describe_demo(&mut ctx, &mut board);

    let options = CompileOptions {
        verbose: cli.verbose,
        ..CompileOptions::default()
    };
    let program = pipeline::compile(ctx, &options);

    match cli.emit {
        EmitStage::C => write_output(&cli.output, &program.c_source),
        EmitStage::BuildInfo => write_output(&cli.output, &program.provenance.to_json()),
        EmitStage::Deploy => {
            if let Err(e) = DryRunDeployer.deploy(&program, cli.team) {
                eprintln!("rcc: error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
