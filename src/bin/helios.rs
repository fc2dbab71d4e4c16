//! Helios - sync Steam and Epic libraries into an Apollo/Sunshine app list.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::{style, Emoji};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use helios_core::apollo::{ApolloAppsFile, ExternalStore};
use helios_core::cache::{CacheSnapshot, CacheStore, RebuildOutcome};
use helios_core::config::{Config, HeliosPaths};
use helios_core::covers::{CoverPipeline, CoverStatus, RepairAction};
use helios_core::managed::ManagedStore;
use helios_core::reconcile::{
    Action, CandidateOutcome, CandidateReport, Filters, Plan, Reconciler, Selection,
};
use helios_core::sources;
use helios_core::{format_id, AppKind, Source};

static CHECK: Emoji = Emoji("✓ ", "* ");
static CROSS: Emoji = Emoji("✗ ", "x ");
static ARROW: Emoji = Emoji("→ ", "-> ");
static INFO: Emoji = Emoji("ℹ ", "i ");

#[derive(Parser)]
#[command(name = "helios")]
#[command(author, version, about = "Sync Steam and Epic game libraries into an Apollo/Sunshine app list")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory for cache, managed state, and covers
    #[arg(long, global = true, env = "HELIOS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Steam installation root
    #[arg(long, global = true, env = "HELIOS_STEAM_ROOT")]
    steam_root: Option<PathBuf>,

    /// Epic Games Launcher Manifests directory
    #[arg(long, global = true, env = "HELIOS_EPIC_MANIFESTS")]
    epic_manifests: Option<PathBuf>,

    /// Epic catalog cache file (catcache.bin)
    #[arg(long, global = true, env = "HELIOS_EPIC_CATCACHE")]
    epic_catcache: Option<PathBuf>,

    /// Apollo or Sunshine apps.json
    #[arg(long, global = true, env = "HELIOS_APPS_FILE")]
    apps_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered apps and their managed state
    List {
        /// Rescan sources before listing
        #[arg(short, long)]
        refresh: bool,

        /// Filter by source (steam, nonsteam, epic)
        #[arg(short, long)]
        source: Option<Source>,

        /// Filter by type (game, application, tool)
        #[arg(short = 't', long = "type")]
        kind: Option<AppKind>,

        /// Filter by name substring
        #[arg(long)]
        search: Option<String>,

        /// Only show managed apps
        #[arg(long, conflicts_with = "unmanaged")]
        managed: bool,

        /// Only show unmanaged apps
        #[arg(long)]
        unmanaged: bool,
    },

    /// Add apps to the external store
    Add {
        /// App ids to add (see list)
        ids: Vec<Uuid>,

        /// Add every unmanaged app matching the filters
        #[arg(long)]
        all: bool,

        /// Filter by source (steam, nonsteam, epic)
        #[arg(short, long)]
        source: Option<Source>,

        /// Filter by type (game, application, tool)
        #[arg(short = 't', long = "type")]
        kind: Option<AppKind>,

        /// Filter by name substring
        #[arg(long)]
        search: Option<String>,

        /// Show what would be added without adding
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Exit non-zero if any candidate fails
        #[arg(long)]
        strict: bool,
    },

    /// Remove managed apps from the external store
    Remove {
        /// App ids to remove (see list)
        ids: Vec<Uuid>,

        /// Remove every managed app matching the filters
        #[arg(long)]
        all: bool,

        /// Filter by source (steam, nonsteam, epic)
        #[arg(short, long)]
        source: Option<Source>,

        /// Filter by type (game, application, tool)
        #[arg(short = 't', long = "type")]
        kind: Option<AppKind>,

        /// Filter by name substring
        #[arg(long)]
        search: Option<String>,

        /// Show what would be removed without removing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Exit non-zero if any candidate fails
        #[arg(long)]
        strict: bool,
    },

    /// Show source, cache, managed, and external store health
    Status {
        /// Show the first few cached names per source
        #[arg(long)]
        sample: bool,
    },

    /// Manage the discovery cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage generated cover art
    Covers {
        #[command(subcommand)]
        action: CoverAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Rescan sources and rewrite their partitions
    Rebuild {
        /// Only rebuild this source
        #[arg(short, long)]
        source: Option<Source>,
    },
}

#[derive(Subcommand)]
enum CoverAction {
    /// Validate every managed entry's cover file
    Verify,

    /// Regenerate missing or corrupted covers from source artwork
    Repair,

    /// Delete cover files no managed entry references
    Cleanup,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let paths = config.paths()?;
    paths.ensure()?;

    match cli.command {
        Commands::List {
            refresh,
            source,
            kind,
            search,
            managed,
            unmanaged,
        } => {
            let filters = Filters {
                source,
                kind,
                search,
                managed: flag_pair(managed, unmanaged),
            };
            list(&config, &paths, &filters, refresh)
        }
        Commands::Add {
            ids,
            all,
            source,
            kind,
            search,
            dry_run,
            strict,
        } => {
            let filters = Filters {
                source,
                kind,
                search,
                managed: None,
            };
            add(&config, &paths, ids, all, &filters, dry_run, strict)
        }
        Commands::Remove {
            ids,
            all,
            source,
            kind,
            search,
            dry_run,
            strict,
        } => {
            let filters = Filters {
                source,
                kind,
                search,
                managed: None,
            };
            remove(&config, &paths, ids, all, &filters, dry_run, strict)
        }
        Commands::Status { sample } => status(&config, &paths, sample),
        Commands::Cache { action } => match action {
            CacheAction::Rebuild { source } => rebuild_cache(&config, &paths, source),
        },
        Commands::Covers { action } => match action {
            CoverAction::Verify => covers_verify(&paths),
            CoverAction::Repair => covers_repair(&config, &paths),
            CoverAction::Cleanup => covers_cleanup(&paths),
        },
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(root) = &cli.steam_root {
        config.steam_root = Some(root.clone());
    }
    if let Some(dir) = &cli.epic_manifests {
        config.epic_manifests_dir = Some(dir.clone());
    }
    if let Some(file) = &cli.epic_catcache {
        config.epic_catalog_cache = Some(file.clone());
    }
    if let Some(file) = &cli.apps_file {
        config.apollo_apps_file = Some(file.clone());
    }
    Ok(config)
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Loads the cache, rebuilding when forced, empty, or partially corrupt.
/// Fails only when nothing is available at all: no readable source and no
/// previously cached data.
fn ensure_cache(config: &Config, store: &CacheStore, refresh: bool) -> Result<CacheSnapshot> {
    let mut snapshot = store.load()?;
    let corrupt = snapshot.corrupt_sources();
    let full = refresh || snapshot.is_empty();
    if full || !corrupt.is_empty() {
        let readers = sources::readers(config);
        let outcome = if full {
            store.rebuild(&readers, None)?
        } else {
            let mut merged = RebuildOutcome::default();
            for source in corrupt {
                let one = store.rebuild(&readers, Some(source))?;
                merged.scans.extend(one.scans);
                merged.unavailable.extend(one.unavailable);
            }
            merged
        };
        snapshot = store.load()?;
        if snapshot.is_empty() && outcome.scans.is_empty() {
            bail!("no library source is available and the cache is empty");
        }
    }
    Ok(snapshot)
}

fn list(config: &Config, paths: &HeliosPaths, filters: &Filters, refresh: bool) -> Result<()> {
    let store = CacheStore::new(paths.clone());
    let snapshot = ensure_cache(config, &store, refresh)?;
    let managed: HashSet<Uuid> = ManagedStore::new(paths)
        .list()?
        .iter()
        .map(|e| e.id)
        .collect();

    println!("{}", style("Discovered apps:").bold());
    println!();

    let mut shown = 0;
    let mut shown_managed = 0;
    for record in snapshot.records() {
        let is_managed = managed.contains(&record.id);
        if !filters.matches(record, is_managed) {
            continue;
        }
        let marker = if is_managed {
            style("✓").green().bold()
        } else {
            style(" ").dim()
        };
        println!(
            "  {} {} {:<9} {:<12} {}",
            marker,
            style(format_id(&record.id)).dim(),
            record.source.tag(),
            record.kind.to_string(),
            style(&record.name).cyan()
        );
        shown += 1;
        if is_managed {
            shown_managed += 1;
        }
    }

    println!();
    if shown == 0 {
        println!("  {} No apps match", INFO);
    } else {
        println!(
            "  {} apps, {} managed ({} marks managed)",
            shown,
            shown_managed,
            style("✓").green()
        );
    }
    Ok(())
}

fn add(
    config: &Config,
    paths: &HeliosPaths,
    ids: Vec<Uuid>,
    all: bool,
    filters: &Filters,
    dry_run: bool,
    strict: bool,
) -> Result<()> {
    let selection = build_selection(ids, all)?;
    let store = CacheStore::new(paths.clone());
    let snapshot = ensure_cache(config, &store, false)?;
    let managed = ManagedStore::new(paths);
    let covers = CoverPipeline::new(paths);
    let mut external = open_external(config)?;

    let mut rec = Reconciler::new(&snapshot, &managed, &covers, &mut external);
    let plan = rec.plan_add(&selection, filters)?;
    run_plan(&mut rec, plan, dry_run, strict)
}

fn remove(
    config: &Config,
    paths: &HeliosPaths,
    ids: Vec<Uuid>,
    all: bool,
    filters: &Filters,
    dry_run: bool,
    strict: bool,
) -> Result<()> {
    let selection = build_selection(ids, all)?;
    let store = CacheStore::new(paths.clone());
    let snapshot = store.load()?;
    let managed = ManagedStore::new(paths);
    let covers = CoverPipeline::new(paths);
    let mut external = open_external(config)?;

    let mut rec = Reconciler::new(&snapshot, &managed, &covers, &mut external);
    let plan = rec.plan_remove(&selection, filters)?;
    run_plan(&mut rec, plan, dry_run, strict)
}

fn build_selection(ids: Vec<Uuid>, all: bool) -> Result<Selection> {
    match (ids.is_empty(), all) {
        (false, false) => Ok(Selection::Ids(ids)),
        (true, true) => Ok(Selection::All),
        (false, true) => bail!("pass either app ids or --all, not both"),
        (true, false) => bail!("pass app ids or --all (see: helios list)"),
    }
}

fn open_external(config: &Config) -> Result<ApolloAppsFile> {
    let path = config
        .apollo_apps_file
        .clone()
        .context("no Apollo apps.json configured; pass --apps-file or set apolloAppsFile in the config")?;
    Ok(ApolloAppsFile::new(path))
}

fn run_plan(rec: &mut Reconciler, plan: Plan, dry_run: bool, strict: bool) -> Result<()> {
    if plan.is_noop() && plan.resolved.is_empty() {
        println!("{} Nothing to do", CHECK);
        return Ok(());
    }

    if dry_run {
        let verb = match plan.action {
            Action::Add => "add",
            Action::Remove => "remove",
        };
        for mutation in &plan.mutations {
            println!(
                "  {} would {} {} {}",
                ARROW,
                verb,
                style(mutation.name()).cyan(),
                style(format_id(&mutation.id())).dim()
            );
        }
        print_reports(&plan.resolved);
        println!();
        println!("{} Dry run - no changes made", INFO);
        return Ok(());
    }

    let total = plan.mutations.len() + plan.resolved.len();
    let reports = rec.apply(plan)?;
    let failures = print_reports(&reports);

    println!();
    if failures > 0 {
        println!("{} {} of {} candidates failed", CROSS, failures, total);
        if strict {
            bail!("{} candidates failed", failures);
        }
    } else {
        println!("{} {} candidates processed", CHECK, total);
    }
    Ok(())
}

fn print_reports(reports: &[CandidateReport]) -> usize {
    let mut failures = 0;
    for report in reports {
        match &report.outcome {
            CandidateOutcome::Added { cover_error: None } => {
                println!("{} Added {}", CHECK, style(&report.name).green());
            }
            CandidateOutcome::Added {
                cover_error: Some(reason),
            } => {
                println!(
                    "{} Added {} {}",
                    CHECK,
                    style(&report.name).green(),
                    style("(no cover art)").yellow()
                );
                println!("    {}", style(reason).dim());
            }
            CandidateOutcome::AlreadyManaged => {
                println!("{} {} is already managed", INFO, style(&report.name).cyan());
            }
            CandidateOutcome::Removed => {
                println!("{} Removed {}", CHECK, style(&report.name).green());
            }
            CandidateOutcome::NotManaged => {
                println!("{} {} is not managed", INFO, style(&report.name).cyan());
            }
            CandidateOutcome::ConflictPurged => {
                println!(
                    "{} {} was already gone externally; purged local entry",
                    INFO,
                    style(&report.name).yellow()
                );
            }
            CandidateOutcome::UnknownId => {
                println!("{} {} is not in the cache", CROSS, style(&report.name).dim());
            }
            CandidateOutcome::FilteredOut => {
                println!(
                    "{} {} does not match the filters",
                    INFO,
                    style(&report.name).dim()
                );
            }
            CandidateOutcome::Failed(reason) => {
                println!("{} {}: {}", CROSS, style(&report.name).red(), reason);
                failures += 1;
            }
        }
    }
    failures
}

fn status(config: &Config, paths: &HeliosPaths, sample: bool) -> Result<()> {
    let store = CacheStore::new(paths.clone());
    let snapshot = store.load()?;

    println!("{}", style("Sources:").bold());
    for reader in sources::readers(config) {
        let source = reader.source();
        let partition = snapshot.partition(source);
        let cached = partition.map(|p| p.records.len()).unwrap_or(0);
        let refreshed = partition
            .and_then(|p| p.refreshed_at)
            .map(|t| format!("refreshed {}", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_else(|| "never refreshed".to_string());
        match reader.read() {
            Ok(_) => println!(
                "  {} {:<15} {:>4} cached  {}",
                CHECK,
                source.label(),
                cached,
                style(refreshed).dim()
            ),
            Err(err) => println!(
                "  {} {:<15} {:>4} cached  {}",
                CROSS,
                source.label(),
                cached,
                style(err.reason).yellow()
            ),
        }
        if sample {
            if let Some(partition) = partition {
                for record in partition.records.iter().take(5) {
                    println!("      - {}", style(&record.name).dim());
                }
            }
        }
    }

    let managed_store = ManagedStore::new(paths);
    let entries = managed_store.list()?;
    let covers = CoverPipeline::new(paths);

    println!();
    println!("{}", style("Managed:").bold());
    println!("  {} entries", entries.len());
    if !entries.is_empty() {
        let mut valid = 0;
        let mut missing = 0;
        let mut corrupted = 0;
        for entry in &entries {
            match covers.validate(&entry.id) {
                CoverStatus::Valid => valid += 1,
                CoverStatus::Missing => missing += 1,
                CoverStatus::Corrupted => corrupted += 1,
            }
        }
        let managed_ids: HashSet<Uuid> = entries.iter().map(|e| e.id).collect();
        let orphaned = covers.orphans(&managed_ids)?.len();
        println!(
            "  covers: {} valid, {} missing, {} corrupted, {} orphaned",
            valid, missing, corrupted, orphaned
        );
        if missing + corrupted > 0 {
            println!(
                "  Repair with: {} helios covers repair",
                style("$").dim()
            );
        }
        if orphaned > 0 {
            println!(
                "  Clean up with: {} helios covers cleanup",
                style("$").dim()
            );
        }
    }

    println!();
    println!("{}", style("External store:").bold());
    match config.apollo_apps_file.as_ref() {
        None => println!("  {} not configured", INFO),
        Some(path) => {
            let mut external = ApolloAppsFile::new(path.clone());
            match external.list_apps() {
                Ok(ids) => {
                    println!("  {} {} apps in {}", CHECK, ids.len(), style(path.display()).dim());
                    let mut rec =
                        Reconciler::new(&snapshot, &managed_store, &covers, &mut external);
                    for report in rec.sync_managed()? {
                        println!(
                            "  {} {} no longer listed externally; purged local entry",
                            INFO,
                            style(&report.name).yellow()
                        );
                    }
                }
                Err(err) => println!("  {} {}", CROSS, style(err).yellow()),
            }
        }
    }
    Ok(())
}

fn rebuild_cache(config: &Config, paths: &HeliosPaths, only: Option<Source>) -> Result<()> {
    let store = CacheStore::new(paths.clone());
    let readers = sources::readers(config);
    let outcome = store.rebuild(&readers, only)?;

    for scan in &outcome.scans {
        let skipped = if scan.skipped.is_empty() {
            String::new()
        } else {
            format!(" ({} skipped)", scan.skipped.len())
        };
        println!(
            "{} {}: {} apps{}",
            CHECK,
            scan.source.label(),
            style(scan.records.len()).cyan(),
            style(skipped).yellow()
        );
    }
    for unavailable in &outcome.unavailable {
        println!("{} {}", CROSS, style(unavailable).yellow());
    }
    if outcome.scans.is_empty() {
        bail!("no source could be scanned");
    }
    Ok(())
}

fn covers_verify(paths: &HeliosPaths) -> Result<()> {
    let entries = ManagedStore::new(paths).list()?;
    if entries.is_empty() {
        println!("{} Nothing is managed, no covers to verify", INFO);
        return Ok(());
    }

    let covers = CoverPipeline::new(paths);
    let mut bad = 0;
    for entry in &entries {
        match covers.validate(&entry.id) {
            CoverStatus::Valid => {
                println!("{} {}", CHECK, style(&entry.name).green());
            }
            CoverStatus::Missing => {
                bad += 1;
                println!("{} {} {}", CROSS, style(&entry.name).red(), style("missing").yellow());
            }
            CoverStatus::Corrupted => {
                bad += 1;
                println!("{} {} {}", CROSS, style(&entry.name).red(), style("corrupted").yellow());
            }
        }
    }

    println!();
    if bad == 0 {
        println!("{} All {} covers are valid", CHECK, entries.len());
    } else {
        println!(
            "{} {} of {} covers need repair: {} helios covers repair",
            INFO,
            bad,
            entries.len(),
            style("$").dim()
        );
    }
    Ok(())
}

fn covers_repair(config: &Config, paths: &HeliosPaths) -> Result<()> {
    let store = CacheStore::new(paths.clone());
    let snapshot = ensure_cache(config, &store, false)?;
    let managed = ManagedStore::new(paths);
    let covers = CoverPipeline::new(paths);

    let reports = covers.repair(&managed, &snapshot)?;
    let mut intact = 0;
    for report in &reports {
        match &report.action {
            RepairAction::Intact => intact += 1,
            RepairAction::Regenerated => {
                println!("{} Regenerated {}", CHECK, style(&report.name).green());
            }
            RepairAction::Failed(reason) => {
                println!("{} {}: {}", CROSS, style(&report.name).red(), reason);
            }
            RepairAction::NoRecord => {
                println!(
                    "{} {} is no longer in the cache; cannot regenerate",
                    INFO,
                    style(&report.name).yellow()
                );
            }
        }
    }

    println!();
    println!("{} {} covers intact, {} entries checked", CHECK, intact, reports.len());
    Ok(())
}

fn covers_cleanup(paths: &HeliosPaths) -> Result<()> {
    let managed: HashSet<Uuid> = ManagedStore::new(paths)
        .list()?
        .iter()
        .map(|e| e.id)
        .collect();
    let removed = CoverPipeline::new(paths).cleanup_orphans(&managed)?;
    if removed == 0 {
        println!("{} No orphaned covers", CHECK);
    } else {
        println!("{} Removed {} orphaned covers", CHECK, removed);
    }
    Ok(())
}
