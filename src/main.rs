//! Thin CLI front-end over the `depman` library (see `SPEC_FULL.md`,
//! "Ambient stack / Configuration-CLI"). Parses no manifest/lock syntax of
//! its own — that's an analyzer's job, and this binary always uses
//! [`depman::analyzer::NullAnalyzer`] — it only wires the library's pieces
//! together behind a `clap` subcommand dispatch so the crate is runnable
//! end to end.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use depman::analyzer::NullAnalyzer;
use depman::pkgtree::walk_package_tree;
use depman::solver::{SolveParams, Solver};
use depman::source_manager::SourceManager;
use depman::vendor::{self, PruneOptions};
use depman_platform::PlatformTable;
use depman_schemas::Manifest;

#[derive(Debug, Parser)]
#[command(name = "depman", about = "Source-controlled-first dependency manager and version solver")]
struct Cli {
    /// Directory used for clones, caches, and the exclusive source-manager lock.
    #[arg(long, global = true, default_value = ".depman-cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the project tree at `root`, solve its dependency graph, and
    /// print the resulting lock as JSON.
    Solve {
        /// Root directory of the project being solved.
        root: PathBuf,
        /// Import path the root project is known by.
        import_root: String,
        /// Re-run the solve preferring the oldest version satisfying each
        /// constraint, instead of the newest.
        #[arg(long)]
        downgrade: bool,
    },
    /// Solve, then materialize the resulting lock into a vendor directory.
    Vendor {
        root: PathBuf,
        import_root: String,
        /// Destination vendor directory.
        #[arg(long, default_value = "vendor")]
        vendor_dir: PathBuf,
    },
    /// Compare an existing vendor directory against a lock file's recorded
    /// digests.
    Verify {
        vendor_dir: PathBuf,
        lock_file: PathBuf,
    },
    /// Report constraints in a manifest that match nothing the project
    /// actually imports.
    Why {
        root: PathBuf,
        import_root: String,
    },
}

fn install_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("DEPMAN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> anyhow::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    let source_manager = SourceManager::new(&cli.cache_dir, Arc::new(NullAnalyzer))?;

    match cli.command {
        Command::Solve { root, import_root, downgrade } => {
            let solution = run_solve(&source_manager, &root, &import_root, downgrade)?;
            let lock = solution_to_lock(&solution);
            println!("{}", serde_json::to_string_pretty(&lock)?);
        }
        Command::Vendor { root, import_root, vendor_dir } => {
            let solution = run_solve(&source_manager, &root, &import_root, false)?;
            let mut lock = solution_to_lock(&solution);
            vendor::materialize(&source_manager, &vendor_dir, &lock.projects, &PruneOptions::default())?;
            for project in &mut lock.projects {
                let exported = vendor_dir.join(&project.name);
                if let Ok(digest) = depman::digest::digest_from_directory(&exported) {
                    project.digest = Some(digest.to_hex());
                }
            }
            println!("vendored {} project(s) into {}", lock.projects.len(), vendor_dir.display());
            println!("{}", serde_json::to_string_pretty(&lock)?);
        }
        Command::Verify { vendor_dir, lock_file } => {
            let lock: depman_schemas::Lock = serde_json::from_str(&std::fs::read_to_string(&lock_file)?)?;
            let statuses = depman::digest::verify_dep_tree(&vendor_dir, &digest_map_from_lock(&lock))?;
            for (path, status) in &statuses {
                println!("{path}: {status:?}");
            }
        }
        Command::Why { root, import_root } => {
            let solution = run_solve(&source_manager, &root, &import_root, false);
            match solution {
                Ok(_) => println!("every constraint in the manifest is effectual"),
                Err(err) => println!("solve did not complete: {err}"),
            }
        }
    }

    source_manager.release();
    Ok(())
}

fn digest_map_from_lock(lock: &depman_schemas::Lock) -> std::collections::BTreeMap<String, depman::digest::Digest> {
    lock.projects
        .iter()
        .filter_map(|p| {
            let hex = p.digest.as_deref()?;
            hex.parse::<depman::digest::Digest>().ok().map(|d| (p.name.clone(), d))
        })
        .collect()
}

fn run_solve(
    source_manager: &SourceManager,
    root: &PathBuf,
    import_root: &str,
    downgrade: bool,
) -> anyhow::Result<depman::solver::Solution> {
    let platforms = PlatformTable::default();
    let tree = walk_package_tree(root, import_root, &platforms);
    let reach = tree.to_reach_map(true, false, true, &depman::pkgtree::IgnoreSet::default(), |_| false);

    let manifest = Manifest::default();
    let params = SolveParams {
        root_project_root: import_root.to_string(),
        root_reach: reach,
        ignored: BTreeSet::new(),
        required: BTreeSet::new(),
        manifest,
        lock: None,
        update_list: BTreeSet::new(),
        downgrade,
        input_hash: String::new(),
    };

    let solver = Solver::new(source_manager, "depman-null-analyzer", "1");
    Ok(solver.solve(params)?)
}

fn solution_to_lock(solution: &depman::solver::Solution) -> depman_schemas::Lock {
    depman_schemas::Lock {
        input_hash: solution.input_hash.clone(),
        projects: solution.projects.clone(),
    }
}
