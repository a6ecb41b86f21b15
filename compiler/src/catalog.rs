// catalog.rs — External function catalog
//
// The compiler treats device primitives, arithmetic filters, and scheduling
// primitives as named, globally resolvable C functions. The catalog records,
// per function, everything the compiler needs: the name, the parameter
// specs, the return kind, whether a registration call may be dropped
// entirely when its callback turns out to do nothing, and (for pure filters)
// a host-side evaluator used to propagate default values at compile time.
//
// The builtin set mirrors the runtime library header. Additional functions
// can be loaded from a JSON manifest; manifest entries carry no evaluator,
// so they cannot be used where default propagation is required.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ir::{Kind, Value};

// ── Data types ──────────────────────────────────────────────────────────────

/// One parameter slot of an external function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSpec {
    Scalar(Kind),
    /// A `void (*)(void)` callback. The compiler wires an instant (or the
    /// neutral `do_nothing`) into this slot.
    Callback,
}

/// Host-side evaluator for a pure filter, applied to literal defaults.
pub type EvalFn = fn(&[Value]) -> Value;

/// Metadata for one external function.
#[derive(Clone)]
pub struct ExternalFn {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub ret: Option<Kind>,
    /// Whether a call whose callback argument was eliminated may itself be
    /// elided. Scheduling nothing is equivalent to scheduling a no-op only
    /// for functions marked here.
    pub callback_eliminable: bool,
    pub eval: Option<EvalFn>,
}

impl fmt::Debug for ExternalFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFn")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("callback_eliminable", &self.callback_eliminable)
            .field("eval", &self.eval.is_some())
            .finish()
    }
}

/// Errors that can occur while loading a catalog manifest.
#[derive(Debug)]
pub enum CatalogError {
    Parse(serde_json::Error),
    DuplicateFunction { name: String },
    UnknownKind { function: String, kind: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Parse(e) => write!(f, "manifest parse error: {}", e),
            CatalogError::DuplicateFunction { name } => {
                write!(f, "duplicate external function '{}'", name)
            }
            CatalogError::UnknownKind { function, kind } => {
                write!(f, "unknown kind '{}' on external function '{}'", kind, function)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

// ── Manifest format ─────────────────────────────────────────────────────────

/// JSON manifest entry. Kind strings are `bool`, `int`, `double`, and (for
/// parameters) `callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    params: Vec<String>,
    #[serde(default)]
    returns: Option<String>,
    #[serde(default)]
    callback_eliminable: bool,
}

fn kind_from_str(function: &str, s: &str) -> Result<Kind, CatalogError> {
    match s {
        "bool" => Ok(Kind::Bool),
        "int" => Ok(Kind::Int),
        "double" => Ok(Kind::Float),
        other => Err(CatalogError::UnknownKind {
            function: function.to_string(),
            kind: other.to_string(),
        }),
    }
}

fn kind_to_str(k: Kind) -> &'static str {
    match k {
        Kind::Bool => "bool",
        Kind::Int => "int",
        Kind::Float => "double",
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// The external function catalog, keyed by name.
pub struct Catalog {
    fns: BTreeMap<String, ExternalFn>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// An empty catalog. Mostly useful in tests; real compilations start
    /// from [`Catalog::builtin`].
    pub fn empty() -> Self {
        Catalog {
            fns: BTreeMap::new(),
        }
    }

    /// The runtime library surface: the run loop, timers, pure filters, and
    /// the device push/pull/registration primitives.
    pub fn builtin() -> Self {
        use Kind::{Bool, Float, Int};
        use ParamSpec::{Callback, Scalar};

        let mut c = Catalog::empty();
        let mut f = |name: &str,
                     params: Vec<ParamSpec>,
                     ret: Option<Kind>,
                     callback_eliminable: bool,
                     eval: Option<EvalFn>| {
            c.fns.insert(
                name.to_string(),
                ExternalFn {
                    name: name.to_string(),
                    params,
                    ret,
                    callback_eliminable,
                    eval,
                },
            );
        };

        // run loop
        f("enter_loop", vec![Callback], None, false, None);
        f("queue_event", vec![Callback], None, false, None);
        f("do_nothing", vec![], None, false, None);

        // timers; a periodic registration with a no-op callback is dropped
        f("start_timer_ns", vec![Scalar(Int), Callback], None, true, None);
        f("begin_timers", vec![], None, false, None);
        f("run_after_ns", vec![Scalar(Int), Callback], None, false, None);

        // pure filters
        f(
            "deadzone",
            vec![Scalar(Float), Scalar(Float)],
            Some(Float),
            false,
            Some(eval_deadzone),
        );
        f(
            "choose_float",
            vec![Scalar(Bool), Scalar(Float), Scalar(Float)],
            Some(Float),
            false,
            Some(eval_choose_float),
        );
        f(
            "pwm_map",
            vec![
                Scalar(Float),
                Scalar(Float),
                Scalar(Float),
                Scalar(Float),
                Scalar(Float),
                Scalar(Float),
            ],
            Some(Float),
            false,
            Some(eval_pwm_map),
        );
        f(
            "ramping_update",
            vec![Scalar(Float), Scalar(Float), Scalar(Float)],
            Some(Float),
            false,
            Some(eval_ramping_update),
        );

        // driver station
        f("ds_init", vec![], None, false, None);
        f("ds_begin", vec![Callback], None, false, None);
        f("get_robot_mode", vec![], Some(Int), false, None);
        f(
            "get_joystick_axis",
            vec![Scalar(Int), Scalar(Int)],
            Some(Float),
            false,
            None,
        );
        f(
            "get_joystick_button",
            vec![Scalar(Int), Scalar(Int)],
            Some(Bool),
            false,
            None,
        );

        // PWM
        f(
            "pwm_init",
            vec![Scalar(Int), Scalar(Int), Scalar(Bool)],
            None,
            false,
            None,
        );
        f("pwm_update", vec![Scalar(Float), Scalar(Int)], None, false, None);

        // solenoids
        f("solenoid_init", vec![Scalar(Int), Scalar(Int)], None, false, None);
        f(
            "solenoid_update",
            vec![Scalar(Bool), Scalar(Int), Scalar(Int)],
            None,
            false,
            None,
        );

        // GPIO
        f("gpio_init_input_poll", vec![Scalar(Int)], None, false, None);
        f("gpio_poll_input", vec![Scalar(Int)], Some(Bool), false, None);
        f(
            "gpio_init_input_interrupt",
            vec![Scalar(Int), Scalar(Int)],
            None,
            false,
            None,
        );
        f(
            "gpio_start_interrupt",
            vec![Scalar(Int), Scalar(Int), Callback],
            None,
            false,
            None,
        );

        c
    }

    pub fn lookup(&self, name: &str) -> Option<&ExternalFn> {
        self.fns.get(name)
    }

    /// Look up a function that must exist; missing names in compiler-built
    /// wiring are contract violations.
    pub fn expect(&self, name: &str) -> &ExternalFn {
        self.lookup(name)
            .unwrap_or_else(|| panic!("external function '{}' is not in the catalog", name))
    }

    pub fn is_callback_eliminable(&self, name: &str) -> bool {
        self.lookup(name).map_or(false, |f| f.callback_eliminable)
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    pub fn register(&mut self, f: ExternalFn) -> Result<(), CatalogError> {
        if self.fns.contains_key(&f.name) {
            return Err(CatalogError::DuplicateFunction { name: f.name });
        }
        self.fns.insert(f.name.clone(), f);
        Ok(())
    }

    /// Load additional functions from a JSON manifest string. Returns the
    /// number of functions added.
    pub fn load_manifest_str(&mut self, json: &str) -> Result<usize, CatalogError> {
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(json).map_err(CatalogError::Parse)?;
        let count = entries.len();
        for entry in entries {
            let mut params = Vec::with_capacity(entry.params.len());
            for p in &entry.params {
                if p == "callback" {
                    params.push(ParamSpec::Callback);
                } else {
                    params.push(ParamSpec::Scalar(kind_from_str(&entry.name, p)?));
                }
            }
            let ret = match &entry.returns {
                Some(s) => Some(kind_from_str(&entry.name, s)?),
                None => None,
            };
            self.register(ExternalFn {
                name: entry.name,
                params,
                ret,
                callback_eliminable: entry.callback_eliminable,
                eval: None,
            })?;
        }
        Ok(count)
    }

    /// Canonical compact JSON of the catalog, stable across load order
    /// (entries are name-sorted). Evaluators do not participate.
    pub fn canonical_json(&self) -> String {
        let entries: Vec<ManifestEntry> = self
            .fns
            .values()
            .map(|f| ManifestEntry {
                name: f.name.clone(),
                params: f
                    .params
                    .iter()
                    .map(|p| match p {
                        ParamSpec::Scalar(k) => kind_to_str(*k).to_string(),
                        ParamSpec::Callback => "callback".to_string(),
                    })
                    .collect(),
                returns: f.ret.map(|k| kind_to_str(k).to_string()),
                callback_eliminable: f.callback_eliminable,
            })
            .collect();
        serde_json::to_string(&entries).expect("catalog serialization cannot fail")
    }

    /// SHA-256 over [`canonical_json`](Self::canonical_json).
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

// ── Builtin evaluators ──────────────────────────────────────────────────────

fn expect_float(v: &Value) -> f64 {
    match v {
        Value::Float(f) => *f,
        other => panic!("evaluator expected a float, got {:?}", other),
    }
}

fn expect_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        other => panic!("evaluator expected a bool, got {:?}", other),
    }
}

fn eval_deadzone(args: &[Value]) -> Value {
    let value = expect_float(&args[0]);
    let zone = expect_float(&args[1]);
    Value::Float(if value.abs() >= zone { value } else { 0.0 })
}

fn eval_choose_float(args: &[Value]) -> Value {
    let cond = expect_bool(&args[0]);
    let a = expect_float(&args[1]);
    let b = expect_float(&args[2]);
    Value::Float(if cond { a } else { b })
}

/// Map a speed fraction in [-1, 1] onto a pulse width in milliseconds.
fn eval_pwm_map(args: &[Value]) -> Value {
    let value = expect_float(&args[0]);
    let rev_max = expect_float(&args[1]);
    let rev_min = expect_float(&args[2]);
    let center = expect_float(&args[3]);
    let fwd_min = expect_float(&args[4]);
    let fwd_max = expect_float(&args[5]);
    let millis = if value > 0.0 {
        fwd_min + value * (fwd_max - fwd_min)
    } else if value < 0.0 {
        rev_min + value * (rev_min - rev_max)
    } else {
        center
    };
    Value::Float(millis)
}

fn eval_ramping_update(args: &[Value]) -> Value {
    let previous = expect_float(&args[0]);
    let target = expect_float(&args[1]);
    let max_change = expect_float(&args[2]);
    let delta = target - previous;
    Value::Float(if delta.abs() <= max_change {
        target
    } else {
        previous + max_change.copysign(delta)
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
