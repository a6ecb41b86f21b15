// context.rs — Compilation context
//
// One context per compiled program. It owns the IR arena and the external
// function catalog, carries the root and begin instants, and stages the
// root body: device-init calls first, then begin-phase registrations, then
// the timer-thread start, then the hand-off to the run loop. Every algebra
// call is threaded through a context explicitly; there is no ambient state.

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::channel::EventInput;
use crate::id::InstantId;
use crate::ir::{Atom, IrGraph};

/// Root-assembly phase for external registration calls. Device configuration
/// runs before anything that can start delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InitIo,
    Begin,
}

/// Interned identifier of a closed enumeration used by discrete channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscreteTypeId(pub u32);

pub struct Context {
    pub(crate) ir: IrGraph,
    pub(crate) catalog: Catalog,
    root: InstantId,
    on_begin: InstantId,
    init_stage: InstantId,
    begin_stage: InstantId,
    pub(crate) needs_timer_thread: bool,
    pub(crate) tickers: BTreeMap<u32, EventInput>,
    pub(crate) edge_pairs: BTreeMap<InstantId, (InstantId, InstantId)>,
    discrete_types: Vec<Vec<String>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_catalog(Catalog::builtin())
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        let mut ir = IrGraph::new();
        let root = ir.new_instant(None);
        let on_begin = ir.new_instant(None);
        // staging bodies; moved into the root in phase order by finish()
        let init_stage = ir.new_instant(None);
        let begin_stage = ir.new_instant(None);
        Context {
            ir,
            catalog,
            root,
            on_begin,
            init_stage,
            begin_stage,
            needs_timer_thread: false,
            tickers: BTreeMap::new(),
            edge_pairs: BTreeMap::new(),
            discrete_types: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn root(&self) -> InstantId {
        self.root
    }

    /// Trigger input fired exactly once, when the run loop starts. Collapses
    /// to the neutral no-op callback when nothing subscribes.
    pub fn begin_event(&self) -> EventInput {
        EventInput {
            dispatch: self.on_begin,
        }
    }

    /// Register a phase-ordered external call in the root procedure.
    pub fn add_init_call(&mut self, phase: Phase, func: &str, args: Vec<Atom>) {
        let stage = match phase {
            Phase::InitIo => self.init_stage,
            Phase::Begin => self.begin_stage,
        };
        let ext = self.catalog.expect(func).clone();
        self.ir.push_call_external(stage, &ext, args, None);
    }

    // ── Discrete enumerations ──────────────────────────────────────────────

    /// Intern a closed enumeration. Identical variant lists share one id.
    pub fn discrete_type(&mut self, variants: &[&str]) -> DiscreteTypeId {
        assert!(!variants.is_empty(), "discrete type needs at least one variant");
        let owned: Vec<String> = variants.iter().map(|s| s.to_string()).collect();
        for (i, existing) in self.discrete_types.iter().enumerate() {
            if *existing == owned {
                return DiscreteTypeId(i as u32);
            }
        }
        self.discrete_types.push(owned);
        DiscreteTypeId((self.discrete_types.len() - 1) as u32)
    }

    /// Integer encoding of a variant. Unknown names are contract violations.
    pub fn variant_index(&self, ty: DiscreteTypeId, name: &str) -> i64 {
        let variants = &self.discrete_types[ty.0 as usize];
        variants
            .iter()
            .position(|v| v == name)
            .unwrap_or_else(|| panic!("'{}' is not a variant of discrete type {}", name, ty.0))
            as i64
    }

    // ── Root assembly ──────────────────────────────────────────────────────

    /// Assemble the root body and release the graph for optimization. After
    /// this the description is complete; no further algebra calls happen.
    pub(crate) fn finish(mut self) -> (IrGraph, Catalog, InstantId) {
        let init_body = std::mem::take(&mut self.ir.instant_mut(self.init_stage).body);
        let begin_body = std::mem::take(&mut self.ir.instant_mut(self.begin_stage).body);
        let root = self.root;
        self.ir.instant_mut(root).body.extend(init_body);
        self.ir.instant_mut(root).body.extend(begin_body);
        if self.needs_timer_thread {
            let ext = self.catalog.expect("begin_timers").clone();
            self.ir.push_call_external(root, &ext, vec![], None);
        }
        let ext = self.catalog.expect("enter_loop").clone();
        self.ir
            .push_call_external(root, &ext, vec![Atom::Callback(self.on_begin)], None);
        (self.ir, self.catalog, root)
    }
}
