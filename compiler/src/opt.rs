// opt.rs — Graph-rewriting optimizer
//
// A fixed, ordered sequence of whole-graph rewrite passes, run exactly once
// after the program description is complete and before emission. Each pass
// takes the current live set and returns an updated one. The pass list is
// deliberately not iterated to a fixpoint: a later pass can expose
// opportunities for an earlier one, and those are left unexploited so the
// emitted artifact keeps a stable shape.
//
// Determinism: candidates are processed in id order everywhere, and chain
// chasing is id-stable, so two identical descriptions optimize identically.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::Catalog;
use crate::id::{BoxId, InstantId};
use crate::ir::{Atom, Invocation, IrGraph, Op, Rvalue};

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each optimizer pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassId {
    EliminateEmpty,
    EliminateNops,
    InlineForwarders,
    InlineSingleUse,
}

/// All passes in execution order.
pub const ALL_PASSES: [PassId; 4] = [
    PassId::EliminateEmpty,
    PassId::EliminateNops,
    PassId::InlineForwarders,
    PassId::InlineSingleUse,
];

/// Static metadata about an optimizer pass.
pub struct PassDescriptor {
    pub name: &'static str,
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::EliminateEmpty => PassDescriptor {
            name: "eliminate_empty",
            invariants: "no live non-root instant has an empty body",
        },
        PassId::EliminateNops => PassDescriptor {
            name: "eliminate_nops",
            invariants: "no live body contains a top-level nop",
        },
        PassId::InlineForwarders => PassDescriptor {
            name: "inline_forwarders",
            invariants: "no reference points at a verbatim forwarding alias",
        },
        PassId::InlineSingleUse => PassDescriptor {
            name: "inline_single_use",
            invariants: "every live non-root instant is multiply referenced, \
                         callback-referenced, or collision-preserved",
        },
    }
}

// ── Pass statistics ────────────────────────────────────────────────────────

/// Counters accumulated across the pass run, used by `--verbose` output and
/// by tests asserting optimizer behavior.
#[derive(Debug, Default, Clone)]
pub struct OptStats {
    pub eliminated_empty: usize,
    pub stripped_nops: usize,
    pub forwarders_collapsed: usize,
    pub inlined: usize,
    /// (candidate, host) pairs skipped because caller and callee mutate the
    /// same variable and splicing would merge their updates.
    pub collision_bypasses: Vec<(InstantId, InstantId)>,
}

// ── Entry point ────────────────────────────────────────────────────────────

/// Run all passes once, in order, over `(root, live)`.
pub fn optimize(
    graph: &mut IrGraph,
    root: InstantId,
    mut live: BTreeSet<InstantId>,
    catalog: &Catalog,
) -> (BTreeSet<InstantId>, OptStats) {
    let mut stats = OptStats::default();
    for pass in ALL_PASSES {
        live = match pass {
            PassId::EliminateEmpty => eliminate_empty(graph, root, live, catalog, &mut stats),
            PassId::EliminateNops => eliminate_nops(graph, live, &mut stats),
            PassId::InlineForwarders => inline_forwarders(graph, root, live, &mut stats),
            PassId::InlineSingleUse => inline_single_use(graph, root, live, &mut stats),
        };
    }
    (live, stats)
}

// ── Pass 1: eliminate empty instants ───────────────────────────────────────

fn eliminate_empty(
    graph: &mut IrGraph,
    root: InstantId,
    mut live: BTreeSet<InstantId>,
    catalog: &Catalog,
    stats: &mut OptStats,
) -> BTreeSet<InstantId> {
    let removed: BTreeSet<InstantId> = live
        .iter()
        .copied()
        .filter(|&id| id != root && graph.instant(id).body.is_empty())
        .collect();
    if removed.is_empty() {
        return live;
    }
    stats.eliminated_empty = removed.len();
    for id in &removed {
        live.remove(id);
    }

    let rewrite_args = |args: &[Atom]| -> Vec<Atom> {
        args.iter()
            .map(|a| match a {
                Atom::Callback(i) if removed.contains(i) => {
                    Atom::ExtRef("do_nothing".to_string())
                }
                other => other.clone(),
            })
            .collect()
    };
    let args_hit = |args: &[Atom]| {
        args.iter()
            .any(|a| matches!(a, Atom::Callback(i) if removed.contains(i)))
    };
    let rewrite_invocation = |inv: &Invocation| match inv {
        Invocation::Call { target, .. } if removed.contains(target) => Invocation::Nop,
        other => other.clone(),
    };

    let ids: Vec<InstantId> = live.iter().copied().collect();
    for id in ids {
        let body: Vec<Op> = graph
            .instant(id)
            .body
            .iter()
            .map(|op| match op {
                Op::Invoke { target, .. } if removed.contains(target) => Op::Nop,
                Op::Invoke {
                    target,
                    arg: Some(Rvalue::CallExt { func, args }),
                } if args_hit(args) => {
                    if catalog.is_callback_eliminable(func) {
                        Op::Nop
                    } else {
                        Op::Invoke {
                            target: *target,
                            arg: Some(Rvalue::CallExt {
                                func: func.clone(),
                                args: rewrite_args(args),
                            }),
                        }
                    }
                }
                Op::CallExt { func, args } if args_hit(args) => {
                    if catalog.is_callback_eliminable(func) {
                        Op::Nop
                    } else {
                        Op::CallExt {
                            func: func.clone(),
                            args: rewrite_args(args),
                        }
                    }
                }
                Op::If { cond, then } => match rewrite_invocation(then) {
                    Invocation::Nop => Op::Nop,
                    then => Op::If {
                        cond: cond.clone(),
                        then,
                    },
                },
                Op::IfElse { cond, then, els } => {
                    let then = rewrite_invocation(then);
                    let els = rewrite_invocation(els);
                    if then == Invocation::Nop && els == Invocation::Nop {
                        Op::Nop
                    } else {
                        Op::IfElse {
                            cond: cond.clone(),
                            then,
                            els,
                        }
                    }
                }
                other => other.clone(),
            })
            .collect();
        graph.instant_mut(id).body = body;
    }
    live
}

// ── Pass 2: eliminate nops ─────────────────────────────────────────────────

fn eliminate_nops(
    graph: &mut IrGraph,
    live: BTreeSet<InstantId>,
    stats: &mut OptStats,
) -> BTreeSet<InstantId> {
    for &id in &live {
        let body = &mut graph.instant_mut(id).body;
        let before = body.len();
        body.retain(|op| !matches!(op, Op::Nop));
        stats.stripped_nops += before - body.len();
    }
    live
}

// ── Pass 3: inline trivial forwarders ──────────────────────────────────────

/// If `id` is a pure alias (its whole body is one call forwarding its own
/// parameter verbatim), return the forwarding target.
fn forward_target(graph: &IrGraph, id: InstantId) -> Option<InstantId> {
    let instant = graph.instant(id);
    if instant.body.len() != 1 {
        return None;
    }
    match (&instant.body[0], instant.param) {
        (Op::Invoke { target, arg: None }, None) => Some(*target),
        (
            Op::Invoke {
                target,
                arg: Some(Rvalue::Atom(Atom::Param(p))),
            },
            Some(_),
        ) if *p == id => Some(*target),
        _ => None,
    }
}

/// Chase an alias chain to its end. Returns None when the chain is cyclic,
/// in which case its members must stay live.
fn resolve_alias(remap: &BTreeMap<InstantId, InstantId>, start: InstantId) -> Option<InstantId> {
    let mut seen = BTreeSet::new();
    let mut cur = start;
    while let Some(&next) = remap.get(&cur) {
        if !seen.insert(cur) {
            return None;
        }
        cur = next;
    }
    Some(cur)
}

fn inline_forwarders(
    graph: &mut IrGraph,
    root: InstantId,
    mut live: BTreeSet<InstantId>,
    stats: &mut OptStats,
) -> BTreeSet<InstantId> {
    let mut remap: BTreeMap<InstantId, InstantId> = BTreeMap::new();
    for &id in &live {
        // the root must survive as a defined procedure for the entry point
        if id == root {
            continue;
        }
        if let Some(target) = forward_target(graph, id) {
            remap.insert(id, target);
        }
    }
    // forwarder cycles cannot be collapsed; keep their members
    let cyclic: Vec<InstantId> = remap
        .keys()
        .copied()
        .filter(|&k| resolve_alias(&remap, k).is_none())
        .collect();
    for k in cyclic {
        remap.remove(&k);
    }
    if remap.is_empty() {
        return live;
    }
    stats.forwarders_collapsed = remap.len();
    for id in remap.keys() {
        live.remove(id);
    }

    let resolve = |id: InstantId| resolve_alias(&remap, id).expect("acyclic after cycle removal");
    let resolve_atom = |a: &Atom| match a {
        Atom::Callback(i) => Atom::Callback(resolve(*i)),
        other => other.clone(),
    };
    let resolve_rvalue = |rv: &Rvalue| match rv {
        Rvalue::Atom(a) => Rvalue::Atom(resolve_atom(a)),
        Rvalue::Unary { op, operand } => Rvalue::Unary {
            op: *op,
            operand: resolve_atom(operand),
        },
        Rvalue::Binary { left, op, right } => Rvalue::Binary {
            left: resolve_atom(left),
            op: *op,
            right: resolve_atom(right),
        },
        Rvalue::CallExt { func, args } => Rvalue::CallExt {
            func: func.clone(),
            args: args.iter().map(&resolve_atom).collect(),
        },
    };
    let resolve_invocation = |inv: &Invocation| match inv {
        Invocation::Call { target, arg } => Invocation::Call {
            target: resolve(*target),
            arg: arg.as_ref().map(&resolve_atom),
        },
        Invocation::Nop => Invocation::Nop,
    };

    let ids: Vec<InstantId> = live.iter().copied().collect();
    for id in ids {
        let body: Vec<Op> = graph
            .instant(id)
            .body
            .iter()
            .map(|op| match op {
                Op::Invoke { target, arg } => Op::Invoke {
                    target: resolve(*target),
                    arg: arg.as_ref().map(&resolve_rvalue),
                },
                Op::CallExt { func, args } => Op::CallExt {
                    func: func.clone(),
                    args: args.iter().map(&resolve_atom).collect(),
                },
                Op::Set { target, value } => Op::Set {
                    target: *target,
                    value: resolve_rvalue(value),
                },
                Op::DeclareLocal { slot, kind, value } => Op::DeclareLocal {
                    slot: *slot,
                    kind: *kind,
                    value: resolve_rvalue(value),
                },
                Op::If { cond, then } => Op::If {
                    cond: cond.clone(),
                    then: resolve_invocation(then),
                },
                Op::IfElse { cond, then, els } => Op::IfElse {
                    cond: cond.clone(),
                    then: resolve_invocation(then),
                    els: resolve_invocation(els),
                },
                Op::Nop => Op::Nop,
            })
            .collect();
        graph.instant_mut(id).body = body;
    }
    live
}

// ── Pass 4: reference-counted inlining ─────────────────────────────────────

/// A variable an instant mutates: its own parameter slot or a box it sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Var {
    Param(InstantId),
    Cell(BoxId),
}

fn modified_vars(graph: &IrGraph, id: InstantId) -> BTreeSet<Var> {
    let mut out = BTreeSet::new();
    if graph.instant(id).param.is_some() {
        out.insert(Var::Param(id));
    }
    for op in &graph.instant(id).body {
        if let Op::Set { target, .. } = op {
            out.insert(Var::Cell(*target));
        }
    }
    out
}

fn inline_single_use(
    graph: &mut IrGraph,
    root: InstantId,
    mut live: BTreeSet<InstantId>,
    stats: &mut OptStats,
) -> BTreeSet<InstantId> {
    // reference occurrences per live instant; the root gets one implicit
    // reference (the entry point)
    let mut refs: BTreeMap<InstantId, Vec<Option<InstantId>>> =
        live.iter().map(|&id| (id, Vec::new())).collect();
    refs.get_mut(&root)
        .expect("root must be live")
        .push(None);
    for &id in &live {
        for r in graph.references(id) {
            refs.get_mut(&r)
                .unwrap_or_else(|| panic!("reference to non-live instant {}", r.0))
                .push(Some(id));
        }
    }

    let candidates: Vec<InstantId> = live
        .iter()
        .copied()
        .filter(|&id| id != root && refs[&id].len() == 1)
        .collect();

    let mut inlined: BTreeSet<InstantId> = BTreeSet::new();
    for cand in candidates {
        let mut host = match refs[&cand][0] {
            Some(h) => h,
            None => continue,
        };
        // if the unique caller was itself inlined, the call site now lives
        // in that caller's host; chase until we land in a surviving body
        while inlined.contains(&host) {
            host = refs[&host][0].expect("inlined instant had a unique caller");
        }
        assert_ne!(host, cand, "single-use inlining reached its own candidate");

        if !modified_vars(graph, host).is_disjoint(&modified_vars(graph, cand)) {
            stats.collision_bypasses.push((cand, host));
            continue;
        }

        let positions: Vec<usize> = graph
            .instant(host)
            .body
            .iter()
            .enumerate()
            .filter(|(_, op)| matches!(op, Op::Invoke { target, .. } if *target == cand))
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            // the single reference is a conditional arm or a callback slot;
            // those sites cannot absorb a body
            continue;
        }
        assert_eq!(
            positions.len(),
            1,
            "single-reference instant {} found at multiple call sites",
            cand.0
        );
        let pos = positions[0];

        let callee_body = graph.instant(cand).body.clone();
        let mut replacement = Vec::with_capacity(callee_body.len() + 1);
        if let Some(kind) = graph.instant(cand).param {
            let value = match &graph.instant(host).body[pos] {
                Op::Invoke { arg: Some(rv), .. } => rv.clone(),
                _ => unreachable!("call site of a parameterized instant carries an argument"),
            };
            replacement.push(Op::DeclareLocal {
                slot: cand,
                kind,
                value,
            });
        }
        replacement.extend(callee_body);
        graph
            .instant_mut(host)
            .body
            .splice(pos..pos + 1, replacement);
        inlined.insert(cand);
    }

    stats.inlined = inlined.len();
    for id in &inlined {
        live.remove(id);
    }
    live
}

// ── Tests ──────────────────────────────────────────────────────────────────
