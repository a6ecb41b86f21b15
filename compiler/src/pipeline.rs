// pipeline.rs — Compile orchestration and the deploy seam
//
// The whole compilation is synchronous and single-threaded: finish the root,
// compute reachability, run the optimizer passes once, fold the live graph
// into C text, and fingerprint the result. Either everything succeeds or the
// process aborts before any artifact exists.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::catalog::Catalog;
use crate::codegen::{self, CodegenOptions, GeneratedCode};
use crate::context::Context;
use crate::hal::Controller;
use crate::id::InstantId;
use crate::ir::IrGraph;
use crate::opt::{self, OptStats};

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub codegen: CodegenOptions,
    /// Print phase timing and optimizer statistics to stderr.
    pub verbose: bool,
}

// ── Lowered program ─────────────────────────────────────────────────────────

/// The optimized graph, ready for emission. Exposed separately from
/// [`compile`] so tests and tools can inspect the live set.
pub struct LoweredProgram {
    pub graph: IrGraph,
    pub catalog: Catalog,
    pub root: InstantId,
    pub live: BTreeSet<InstantId>,
    pub stats: OptStats,
}

/// Assemble the root, compute reachability, and run the optimizer.
pub fn lower(ctx: Context) -> LoweredProgram {
    let (mut graph, catalog, root) = ctx.finish();
    let live = graph.reachable_from(root);
    let (live, stats) = opt::optimize(&mut graph, root, live, &catalog);
    LoweredProgram {
        graph,
        catalog,
        root,
        live,
        stats,
    }
}

/// Emit the C translation unit for a lowered program.
pub fn emit(lowered: &LoweredProgram, options: &CodegenOptions) -> GeneratedCode {
    codegen::emit(&lowered.graph, lowered.root, &lowered.live, options)
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Fingerprints identifying a compiled artifact for hermetic deploys.
#[derive(Debug, Clone)]
pub struct Provenance {
    /// SHA-256 of the emitted C source.
    pub source_hash: [u8; 32],
    /// SHA-256 of the catalog's canonical JSON.
    pub catalog_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn catalog_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.catalog_fingerprint)
    }

    /// Serialize as a JSON string for build-info output.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"catalog_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.catalog_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn compute_provenance(c_source: &str, catalog: &Catalog) -> Provenance {
    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(c_source.as_bytes());
        let digest = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        hash
    };
    Provenance {
        source_hash,
        catalog_fingerprint: catalog.fingerprint(),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compile ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CompiledProgram {
    pub c_source: String,
    pub stats: OptStats,
    pub provenance: Provenance,
}

/// Compile a finished description to a C artifact.
pub fn compile(ctx: Context, options: &CompileOptions) -> CompiledProgram {
    let t = Instant::now();
    let lowered = lower(ctx);
    if options.verbose {
        eprintln!(
            "rcc: lower complete, {:.1}ms ({} live instants)",
            t.elapsed().as_secs_f64() * 1000.0,
            lowered.live.len()
        );
        eprintln!(
            "rcc: optimize: {} empty, {} nops, {} forwarders, {} inlined, {} preserved by collision check",
            lowered.stats.eliminated_empty,
            lowered.stats.stripped_nops,
            lowered.stats.forwarders_collapsed,
            lowered.stats.inlined,
            lowered.stats.collision_bypasses.len(),
        );
    }

    let t = Instant::now();
    let generated = emit(&lowered, &options.codegen);
    if options.verbose {
        eprintln!(
            "rcc: codegen complete, {:.1}ms ({} bytes)",
            t.elapsed().as_secs_f64() * 1000.0,
            generated.c_source.len()
        );
    }

    let provenance = compute_provenance(&generated.c_source, &lowered.catalog);
    CompiledProgram {
        c_source: generated.c_source,
        stats: lowered.stats,
        provenance,
    }
}

// ── Deploy seam ─────────────────────────────────────────────────────────────

/// Failure reported by a deploy collaborator, passed upward unchanged.
#[derive(Debug)]
pub struct DeployError {
    pub message: String,
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deploy failed: {}", self.message)
    }
}

impl std::error::Error for DeployError {}

/// The build/deploy collaborator: consumes the emitted text and a numeric
/// target identifier. Opaque to the compiler.
pub trait Deployer {
    fn deploy(&self, program: &CompiledProgram, team_number: u32) -> Result<(), DeployError>;
}

/// Reports what a deploy would do without touching any hardware.
pub struct DryRunDeployer;

impl Deployer for DryRunDeployer {
    fn deploy(&self, program: &CompiledProgram, team_number: u32) -> Result<(), DeployError> {
        eprintln!(
            "rcc: would deploy {} bytes to team {} (source sha256 {})",
            program.c_source.len(),
            team_number,
            program.provenance.source_hash_hex(),
        );
        Ok(())
    }
}

/// Describe, compile, and deploy a robot program in one call.
pub fn robot<F>(
    team_number: u32,
    options: &CompileOptions,
    deployer: &dyn Deployer,
    describe: F,
) -> Result<CompiledProgram, DeployError>
where
    F: FnOnce(&mut Context, &mut Controller),
{
    let mut ctx = Context::new();
    let mut board = Controller::new(&mut ctx);
    describe(&mut ctx, &mut board);
    let program = compile(ctx, options);
    deployer.deploy(&program, team_number)?;
    Ok(program)
}

// ── Tests ───────────────────────────────────────────────────────────────────
