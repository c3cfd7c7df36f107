use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tibiadex_core::character::lookup_character;
use tibiadex_core::config::{Settings, load_config};
use tibiadex_core::http::{HttpFetcher, HttpFetcherConfig};
use tibiadex_core::image::{ImageCache, to_data_uri};
use tibiadex_core::infer::{Vocation, canonicalize_vocation};
use tibiadex_core::query::{ItemFilter, ItemView, categories, filter_items};
use tibiadex_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use tibiadex_core::scrape::{ScrapeReport, Scraper};
use tibiadex_core::store::{EntityKind, Store};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "tibiadex",
    version,
    about = "Scrape Tibia wiki items and creatures into a local catalog"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    #[command(about = "Scrape item listings and detail pages")]
    Scrape(ScrapeArgs),
    #[command(about = "Re-fetch a single item and replace its stored data")]
    Refresh(RefreshArgs),
    #[command(about = "Scrape creature listings")]
    Creatures(CreaturesArgs),
    List(ListArgs),
    Show(ShowArgs),
    #[command(about = "Filter items by level, vocation and category")]
    Items(ItemsArgs),
    Delete(DeleteArgs),
    #[command(name = "delete-category")]
    DeleteCategory(DeleteCategoryArgs),
    Images(ImagesArgs),
    #[command(about = "Look up a character and list the items it can use")]
    Character(CharacterArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .tibiadex/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct ScrapeArgs {
    #[arg(short = 'c', long, value_name = "NAME", help = "Only scrape this category")]
    category: Option<String>,
    #[arg(long, help = "Skip items already in the catalog")]
    missing: bool,
}

#[derive(Debug, Args)]
struct RefreshArgs {
    name: String,
    #[arg(long, help = "Re-infer the category instead of keeping the stored one")]
    update_category: bool,
}

#[derive(Debug, Args)]
struct CreaturesArgs {
    #[arg(short = 'c', long, value_name = "NAME")]
    category: Option<String>,
    #[arg(short = 's', long, value_name = "NAME")]
    subcategory: Option<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, help = "List creatures instead of items")]
    creatures: bool,
    #[arg(short = 'c', long, value_name = "NAME")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    name: String,
    #[arg(long)]
    creature: bool,
    #[arg(long, help = "Print the cached image as a data: URI")]
    embed_image: bool,
}

#[derive(Debug, Args)]
struct ItemsArgs {
    #[arg(long, help = "Highest required level to include")]
    level: Option<i64>,
    #[arg(long, help = "Lowest required level to include")]
    min_level: Option<i64>,
    #[arg(long, value_name = "VOCATION")]
    vocation: Option<String>,
    #[arg(short = 'c', long, value_name = "NAME")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    name: String,
    #[arg(long)]
    creature: bool,
}

#[derive(Debug, Args)]
struct DeleteCategoryArgs {
    category: String,
    #[arg(long)]
    creatures: bool,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    #[command(subcommand)]
    command: ImagesSubcommand,
}

#[derive(Debug, Subcommand)]
enum ImagesSubcommand {
    #[command(about = "Move item images into their category folders")]
    Relocate,
    #[command(about = "Report orphaned and missing image files")]
    Audit,
}

#[derive(Debug, Args)]
struct CharacterArgs {
    name: String,
    #[arg(short = 'c', long, value_name = "NAME")]
    category: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Scrape(args)) => run_scrape(&runtime, args),
        Some(Commands::Refresh(args)) => run_refresh(&runtime, args),
        Some(Commands::Creatures(args)) => run_creatures(&runtime, args),
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Show(args)) => run_show(&runtime, args),
        Some(Commands::Items(args)) => run_items(&runtime, args),
        Some(Commands::Delete(args)) => run_delete(&runtime, args),
        Some(Commands::DeleteCategory(args)) => run_delete_category(&runtime, args),
        Some(Commands::Images(ImagesArgs { command })) => match command {
            ImagesSubcommand::Relocate => run_images_relocate(&runtime),
            ImagesSubcommand::Audit => run_images_audit(&runtime),
        },
        Some(Commands::Character(args)) => run_character(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized tibiadex runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("images_dir: {}", normalize_for_display(&paths.images_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("images_dir_exists: {}", format_flag(status.images_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    if status.db_exists {
        let store = Store::open(&paths.db_path)?;
        println!("items: {}", store.count(EntityKind::Item)?);
        println!("creatures: {}", store.count(EntityKind::Creature)?);
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_scrape(runtime: &RuntimeOptions, args: ScrapeArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut fetcher = session.fetcher()?;
    let mut store = Store::open(&session.paths.db_path)?;
    let images = session.image_cache();

    let mut scraper = Scraper::new(&mut fetcher, &mut store, &images, &session.settings)
        .with_cancel_flag(install_interrupt_flag()?);
    let report = if args.missing {
        scraper.scrape_missing(args.category.as_deref())?
    } else {
        scraper.scrape(args.category.as_deref())?
    };

    println!("scrape");
    println!("category: {}", args.category.as_deref().unwrap_or("<all>"));
    println!("missing_only: {}", args.missing);
    print_scrape_report("items", &report);
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_refresh(runtime: &RuntimeOptions, args: RefreshArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut fetcher = session.fetcher()?;
    let mut store = Store::open(&session.paths.db_path)?;
    let images = session.image_cache();

    let report = Scraper::new(&mut fetcher, &mut store, &images, &session.settings)
        .force_refresh_single(&args.name, !args.update_category)?;

    println!("refresh");
    println!("name: {}", report.name);
    println!(
        "previous_category: {}",
        report.previous_category.as_deref().unwrap_or("<none>")
    );
    println!("category: {}", report.category);
    println!("outcome: {:?}", report.outcome);
    println!("image: {:?}", report.image);
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_creatures(runtime: &RuntimeOptions, args: CreaturesArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut fetcher = session.fetcher()?;
    let mut store = Store::open(&session.paths.db_path)?;
    let images = session.image_cache();

    let report = Scraper::new(&mut fetcher, &mut store, &images, &session.settings)
        .with_cancel_flag(install_interrupt_flag()?)
        .scrape_creatures(args.category.as_deref(), args.subcategory.as_deref())?;

    println!("creatures");
    println!("category: {}", args.category.as_deref().unwrap_or("<all>"));
    println!(
        "subcategory: {}",
        args.subcategory.as_deref().unwrap_or("<all>")
    );
    print_scrape_report("creatures", &report);
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: ListArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = Store::open(&paths.db_path)?;
    let kind = if args.creatures {
        EntityKind::Creature
    } else {
        EntityKind::Item
    };
    let records = store
        .list_all(kind)?
        .into_iter()
        .filter(|record| {
            args.category
                .as_deref()
                .is_none_or(|category| record.category.eq_ignore_ascii_case(category.trim()))
        })
        .collect::<Vec<_>>();

    println!("list {kind}");
    println!("count: {}", records.len());
    if args.category.is_none() {
        println!("categories: {}", categories(&records).join(", "));
    }
    for record in &records {
        match &record.subcategory {
            Some(subcategory) if !subcategory.is_empty() => {
                println!("{}/{}: {}", record.category, subcategory, record.name)
            }
            _ => println!("{}: {}", record.category, record.name),
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, args: ShowArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let store = Store::open(&session.paths.db_path)?;
    let kind = if args.creature {
        EntityKind::Creature
    } else {
        EntityKind::Item
    };
    let Some(record) = store.read(kind, &args.name)? else {
        bail!("no {kind} named {} in the catalog", args.name.trim());
    };
    let embedded = if args.embed_image {
        embedded_image(&session.image_cache(), &record.image_ref)?
    } else {
        None
    };

    if kind == EntityKind::Item {
        let view = ItemView::from_record(record);
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    if let Some(uri) = embedded {
        println!("image_data_uri: {uri}");
    }
    Ok(())
}

fn embedded_image(images: &ImageCache, reference: &str) -> Result<Option<String>> {
    if reference.starts_with("data:") {
        return Ok(Some(reference.to_string()));
    }
    match images.resolve(reference) {
        Some(path) if path.exists() => to_data_uri(&path).map(Some),
        _ => Ok(None),
    }
}

fn run_items(runtime: &RuntimeOptions, args: ItemsArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = Store::open(&paths.db_path)?;
    let filter = ItemFilter {
        category: args.category,
        min_level: args.min_level,
        max_level: args.level,
        vocation: args.vocation.as_deref().map(parse_vocation).transpose()?,
    };
    let views = filter_items(store.list_all(EntityKind::Item)?, &filter);

    println!("items");
    println!("count: {}", views.len());
    print_item_views(&views);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_delete(runtime: &RuntimeOptions, args: DeleteArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = Store::open(&paths.db_path)?;
    let kind = if args.creature {
        EntityKind::Creature
    } else {
        EntityKind::Item
    };
    let deleted = store.delete(kind, &args.name)?;

    println!("delete {kind}");
    println!("name: {}", args.name.trim());
    println!("deleted: {}", format_flag(deleted));
    Ok(())
}

fn run_delete_category(runtime: &RuntimeOptions, args: DeleteCategoryArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = Store::open(&paths.db_path)?;
    let kind = if args.creatures {
        EntityKind::Creature
    } else {
        EntityKind::Item
    };
    let deleted = store.delete_all_by_category(kind, &args.category)?;

    println!("delete-category {kind}");
    println!("category: {}", args.category.trim());
    println!("deleted: {deleted}");
    Ok(())
}

fn run_images_relocate(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::open(runtime)?;
    let store = Store::open(&session.paths.db_path)?;
    let images = session.image_cache();
    let report = images.relocate_item_images(&store)?;

    println!("images relocate");
    println!("images_root: {}", normalize_for_display(images.root()));
    println!("moved: {}", report.moved);
    println!("reused: {}", report.reused);
    println!("already_placed: {}", report.already_placed);
    println!("missing.count: {}", report.missing.len());
    for name in &report.missing {
        println!("missing.name: {name}");
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_images_audit(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::open(runtime)?;
    let store = Store::open(&session.paths.db_path)?;
    let images = session.image_cache();
    let report = images.audit_cache(&store)?;

    println!("images audit");
    println!("images_root: {}", normalize_for_display(images.root()));
    println!("files_scanned: {}", report.files_scanned);
    println!("orphaned.count: {}", report.orphaned_files.len());
    for file in &report.orphaned_files {
        println!("orphaned.file: {file}");
    }
    println!("missing.count: {}", report.missing_files.len());
    for missing in &report.missing_files {
        println!(
            "missing.{}: {} ({})",
            missing.kind, missing.name, missing.image_ref
        );
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_character(runtime: &RuntimeOptions, args: CharacterArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut fetcher = session.fetcher()?;
    let Some(info) = lookup_character(&mut fetcher, &session.settings.character_mirrors, &args.name)
    else {
        bail!("could not look up character {}", args.name.trim());
    };

    println!("character");
    println!("name: {}", info.name);
    println!("level: {}", info.level);
    println!(
        "vocation: {}",
        info.vocation_title.as_deref().unwrap_or("<unknown>")
    );
    println!("source: {}", info.source);

    let store = Store::open(&session.paths.db_path)?;
    let filter = ItemFilter {
        category: args.category,
        ..ItemFilter::for_character(info.level, info.vocation)
    };
    let views = filter_items(store.list_all(EntityKind::Item)?, &filter);
    println!("usable_items.count: {}", views.len());
    print_item_views(&views);
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

/// Paths plus the settings loaded from the resolved config file.
struct Session {
    paths: ResolvedPaths,
    settings: Settings,
}

impl Session {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let settings = load_config(&paths.config_path)?.settings();
        Ok(Self { paths, settings })
    }

    fn fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(HttpFetcherConfig::from_settings(&self.settings))
    }

    fn image_cache(&self) -> ImageCache {
        ImageCache::new(&self.paths.images_dir, &self.settings)
    }
}

fn parse_vocation(value: &str) -> Result<Vocation> {
    canonicalize_vocation(value).with_context(|| {
        format!(
            "unknown vocation {value:?}; expected one of: {}",
            Vocation::ALL
                .iter()
                .map(|vocation| vocation.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

/// Listens for Ctrl-C on a background thread. The first interrupt asks the
/// scraper to stop after the current row; a second one exits immediately.
fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    let cancel = Arc::clone(&flag);
    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            signals.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if cancel.swap(true, Ordering::SeqCst) {
                        tracing::warn!("second interrupt, exiting");
                        std::process::exit(130);
                    }
                    tracing::warn!("interrupt received, stopping after the current row");
                }
            });
        })
        .context("failed to spawn interrupt listener")?;
    Ok(flag)
}

fn print_scrape_report(prefix: &str, report: &ScrapeReport) {
    println!("{prefix}.pages: {}", report.pages);
    println!("{prefix}.processed: {}", report.processed);
    println!("{prefix}.created: {}", report.created);
    println!("{prefix}.updated: {}", report.updated);
    println!("{prefix}.unchanged: {}", report.unchanged);
    println!("{prefix}.rejected: {}", report.rejected);
    println!("{prefix}.skipped: {}", report.skipped);
    println!("{prefix}.images_downloaded: {}", report.images_downloaded);
    println!("{prefix}.images_reused: {}", report.images_reused);
    println!("{prefix}.images_missing: {}", report.images_missing);
    println!("{prefix}.cancelled: {}", report.cancelled);
    if report.failures.is_empty() {
        println!("{prefix}.failures: <none>");
    } else {
        for failure in &report.failures {
            println!("{prefix}.failure: {failure}");
        }
    }
}

fn print_item_views(views: &[ItemView]) {
    for view in views {
        let vocations = if view.vocations.is_empty() {
            "all".to_string()
        } else {
            view.vocations
                .iter()
                .map(|vocation| vocation.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:>4}  {}: {} [{vocations}]",
            view.level, view.record.category, view.record.name
        );
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
