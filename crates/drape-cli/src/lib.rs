//! # Drape CLI
//!
//! Command-line front end for the cloth build pipeline.
//!
//! ## Commands
//! - `build` - Build every cloth of a scene and print a summary
//! - `prebuild` - Build one cloth and export its pre-build data
//! - `inspect` - Decode and summarize a pre-build file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use drape_cloth::{
    BuildEvent, ChannelListener, ClothManager, ClothProcess, ClothScene, ManagerSettings, PreBuildData,
    SharePreBuildData,
};
use drape_constraints::ConstraintSet;
use drape_mesh::VirtualMesh;
use tracing_subscriber::fmt::format::FmtSpan;

/// Drape cloth build tool
#[derive(Parser)]
#[command(name = "drape")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print build spans with their timings
    #[arg(long)]
    pub spans: bool,

    /// Seconds to wait for each build
    #[arg(short, long, default_value = "30")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build every cloth of a scene
    Build {
        /// Scene file (JSON)
        scene: PathBuf,

        /// Only build the named cloth
        #[arg(short, long)]
        cloth: Option<String>,
    },

    /// Build one cloth and write its pre-build data
    Prebuild {
        /// Scene file (JSON)
        scene: PathBuf,

        /// Cloth to export
        #[arg(short, long)]
        cloth: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize a pre-build file
    Inspect {
        /// Pre-build file written by `prebuild`
        file: PathBuf,
    },
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
    if cli.spans {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_span_events(FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).context("installing span subscriber")?;
    }
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Build { scene, cloth } => {
            let scene = load_scene(&scene)?;
            let names: Vec<String> = match cloth {
                Some(name) => vec![name],
                None => scene.cloths.iter().map(|c| c.name.clone()).collect(),
            };
            let failed = with_runtime(|runtime| {
                let (manager, _registry) = ClothManager::in_memory(runtime, ManagerSettings::default());
                let (processes, events) = launch(&manager, &scene, &names, timeout)?;
                let mut failed = 0;
                for event in &events {
                    if !event.success {
                        failed += 1;
                    }
                    let process = processes.iter().find(|p| p.id() == event.cloth);
                    println!("{}", summarize_build(event, process.map(Arc::as_ref)));
                }
                manager.dispose_all();
                Ok(failed)
            })?;
            if failed > 0 {
                bail!("{failed} cloth build(s) failed");
            }
            log::info!("Build complete!");
        }

        Commands::Prebuild { scene, cloth, output } => {
            let scene = load_scene(&scene)?;
            let data = with_runtime(|runtime| {
                let (manager, _registry) = ClothManager::in_memory(runtime, ManagerSettings::default());
                let (processes, events) = launch(&manager, &scene, std::slice::from_ref(&cloth), timeout)?;
                let event = events.first().ok_or_else(|| anyhow!("no build event for {cloth}"))?;
                if !event.success {
                    bail!("build of {} failed: {}", cloth, event.result);
                }
                let process = processes.first().ok_or_else(|| anyhow!("cloth {cloth} not created"))?;
                let data = process
                    .export_pre_build()
                    .map_err(|code| anyhow!("export of {cloth} failed: {code}"))?;
                manager.dispose_all();
                Ok(data)
            })?;
            fs::write(&output, serde_json::to_vec(&data)?)
                .with_context(|| format!("writing {}", output.display()))?;
            log::info!(
                "Pre-build {} written to {} ({} bytes shared)",
                data.key(),
                output.display(),
                data.shared.len()
            );
        }

        Commands::Inspect { file } => {
            let data = load_pre_build(&file)?;
            println!("{}", summarize_pre_build(&data)?);
        }
    }

    Ok(())
}

fn load_scene(path: &Path) -> Result<ClothScene> {
    ClothScene::load(path).with_context(|| format!("loading scene {}", path.display()))
}

fn load_pre_build(path: &Path) -> Result<PreBuildData> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Run `f` on a fresh multi-threaded runtime
fn with_runtime<T>(f: impl FnOnce(tokio::runtime::Handle) -> Result<T>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    f(runtime.handle().clone())
}

/// Install the scene and launch the named cloths, then wait for one event each
fn launch(
    manager: &ClothManager,
    scene: &ClothScene,
    names: &[String],
    timeout: Duration,
) -> Result<(Vec<Arc<ClothProcess>>, Vec<BuildEvent>)> {
    scene.install(manager)?;
    let defs = names
        .iter()
        .map(|name| scene.cloth(name).cloned().ok_or_else(|| anyhow!("no cloth named {name}")))
        .collect::<Result<Vec<_>>>()?;

    let (listener, rx) = ChannelListener::new();
    let processes = manager.launch(defs, Some(Arc::new(listener)));
    let mut events = Vec::with_capacity(processes.len());
    for _ in &processes {
        let event = rx
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("timed out after {}s waiting for a build", timeout.as_secs()))?;
        events.push(event);
    }
    Ok((processes, events))
}

fn summarize_mesh(mesh: &VirtualMesh) -> String {
    let edges = mesh.proxy.as_ref().map_or(0, |p| p.edges.len());
    format!(
        "{} vertices ({} move, {} fixed), {} edges, {} triangles",
        mesh.vertex_count(),
        mesh.move_count(),
        mesh.fixed_count(),
        edges,
        mesh.triangle_count()
    )
}

fn summarize_constraints(set: &ConstraintSet) -> String {
    format!(
        "{} distance links, {} bending pairs, {} inertia anchors",
        set.distance.as_ref().map_or(0, |d| d.link_count()),
        set.bending.as_ref().map_or(0, |b| b.pair_count()),
        set.inertia.as_ref().map_or(0, |i| i.fixed_indices.len())
    )
}

/// One line per build outcome, plus mesh and constraint detail on success
pub fn summarize_build(event: &BuildEvent, process: Option<&ClothProcess>) -> String {
    let mut out = format!("{} [{}]: {}", event.name, event.cloth, event.result);
    let Some(process) = process.filter(|_| event.success) else {
        return out;
    };
    if let Some(mesh) = process.proxy_mesh() {
        out.push_str(&format!("\n  proxy: {}", summarize_mesh(&mesh)));
    }
    out.push_str(&format!("\n  render meshes: {}", process.render_mesh_count()));
    if let Some(set) = process.constraints() {
        out.push_str(&format!("\n  constraints: {}", summarize_constraints(&set)));
    }
    out
}

/// Decode the shared blob and describe its contents
pub fn summarize_pre_build(data: &PreBuildData) -> Result<String> {
    data.validate().map_err(|code| anyhow!("invalid pre-build: {code}"))?;
    let share = SharePreBuildData::from_bytes(&data.shared).map_err(|code| anyhow!("invalid pre-build: {code}"))?;
    Ok(format!(
        "pre-build {} (v{})\n  type: {:?}\n  build scale: {}\n  proxy: {}\n  render meshes: {}\n  constraints: {}",
        data.key(),
        share.version,
        share.cloth_type,
        share.build_scale,
        summarize_mesh(&share.proxy_mesh),
        share.render_meshes.len(),
        summarize_constraints(&share.constraints)
    ))
}
