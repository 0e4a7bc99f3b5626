use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use nsidc_order::{
    BoundingBox, CancellationToken, Client, PageOutcome, ProductConfig, RetryPolicy,
    SpatialFilter, TemporalRange,
};

#[derive(Debug, Parser)]
#[command(
    name = "nsidc-order",
    version,
    about = "Search, order and download ICESat-2 subsets from NSIDC"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Skip TLS certificate verification.
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Count matching granules and their total size.
    Search(SearchArgs),
    /// Submit subset orders page by page and extract the results.
    Order(OrderArgs),
    /// List the subset variables the service offers for the product.
    Capabilities(ProductArgs),
    /// Print the newest product version.
    Version(ProductArgs),
}

#[derive(Debug, Args)]
struct ProductArgs {
    /// Product short name.
    #[arg(long, default_value = "ATL06")]
    product: String,

    /// Product version (defaults to the newest in CMR).
    #[arg(long = "product-version")]
    product_version: Option<String>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[command(flatten)]
    product: ProductArgs,

    /// First day, yyyy-MM-dd.
    #[arg(long)]
    start: String,

    /// Last day (inclusive), yyyy-MM-dd.
    #[arg(long)]
    end: String,

    /// Bounding box W,S,E,N.
    #[arg(long, conflicts_with = "polygon", allow_hyphen_values = true)]
    bbox: Option<String>,

    /// Polygon as comma-separated lon,lat pairs.
    #[arg(long, allow_hyphen_values = true)]
    polygon: Option<String>,
}

#[derive(Debug, Args)]
struct OrderArgs {
    #[command(flatten)]
    search: SearchArgs,

    /// Directory the order archives are extracted into.
    #[arg(long, default_value = ".")]
    dest: PathBuf,

    /// Notification email (falls back to NSIDC_EMAIL / .nsidcrc).
    #[arg(long)]
    email: Option<String>,

    /// Seconds between status queries.
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Give up on an order after this many seconds of waiting.
    #[arg(long)]
    max_wait: Option<u64>,

    /// Shapefile or KML uploaded with each order.
    #[arg(long)]
    boundary_file: Option<PathBuf>,

    /// Hide the status spinner.
    #[arg(long)]
    no_progress: bool,
}

impl ProductArgs {
    fn product(&self) -> ProductConfig {
        let product = ProductConfig::default().with_short_name(&self.product);
        match &self.product_version {
            Some(v) => product.with_version(v),
            None => product,
        }
    }
}

impl SearchArgs {
    fn temporal(&self) -> Result<TemporalRange> {
        Ok(TemporalRange::parse(&self.start, &self.end)?)
    }

    fn spatial(&self) -> Result<Option<SpatialFilter>> {
        Ok(match (&self.bbox, &self.polygon) {
            (Some(b), _) => Some(SpatialFilter::BoundingBox(b.parse::<BoundingBox>()?)),
            (None, Some(p)) => Some(SpatialFilter::Polygon(p.clone())),
            (None, None) => None,
        })
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn client(email: Option<String>, insecure: bool) -> Result<Client> {
    let verify = if insecure { Some(false) } else { None };
    Client::new(None, email, verify).context("failed to configure NSIDC client")
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Search(args) => {
            let client = client(None, cli.insecure)?.with_product(args.product.product());
            let result = client.search(args.temporal()?, args.spatial()?)?;
            println!("Number of granules: {}", result.stats.count);
            let stats = &result.stats;
            if let (Some(mean), Some(total)) = (stats.mean_size_mb, stats.total_size_mb) {
                println!("Average size of granules in MB: {:.3}", mean);
                println!("Total size in MB: {:.3}", total);
            }
        }
        Command::Order(args) => {
            let mut policy =
                RetryPolicy::default().with_interval(Duration::from_secs(args.poll_interval));
            if let Some(secs) = args.max_wait {
                policy = policy.with_max_wait(Duration::from_secs(secs));
            }

            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                eprintln!("Cancelling after the current step...");
                handler_token.cancel();
            })
            .context("failed to install Ctrl+C handler")?;

            let client = client(args.email.clone(), cli.insecure)?
                .with_product(args.search.product.product())
                .with_retry_policy(policy)
                .with_cancellation(cancel)
                .with_progress(!args.no_progress);

            let temporal = args.search.temporal()?;
            let spatial = args
                .search
                .spatial()?
                .context("missing bounding box or polygon (use --bbox or --polygon)")?;

            let report = match &args.boundary_file {
                Some(file) => client.order_with_boundary(temporal, spatial, file, &args.dest)?,
                None => client.order(temporal, spatial, &args.dest)?,
            };

            println!(
                "{} granule(s) in {} order(s)",
                report.granule_count, report.page_count
            );
            for page in &report.pages {
                let files = page.extracted.as_ref().map_or(0, Vec::len);
                println!(
                    "order {} [{}]: {} ({} file(s) extracted)",
                    page.page, page.order_id, page.outcome, files
                );
                for message in &page.diagnostics {
                    println!("    {}", message);
                }
            }
            if report
                .pages
                .iter()
                .any(|p| matches!(p.outcome, PageOutcome::Failed | PageOutcome::TimedOut))
            {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Capabilities(args) => {
            let client = client(None, cli.insecure)?.with_product(args.product());
            let caps = client.capabilities()?;
            if !caps.supports_subsetting() {
                println!("No subset agents available.");
            }
            for agent in &caps.subset_agents {
                println!("{:?}", agent);
            }
            for variable in &caps.variables {
                println!("{}", variable);
            }
        }
        Command::Version(args) => {
            let client = client(None, cli.insecure)?.with_product(args.product());
            println!("{}", client.product_version()?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
