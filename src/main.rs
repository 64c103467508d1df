use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flarelaunch::config::{CloudflareConfig, DEFAULT_CONFIG_FILE};
use flarelaunch::pipeline::Step;
use flarelaunch::{
    HttpApi, Identity, LaunchConfig, LaunchError, Pipeline, PipelineReport, Wrangler, discovery,
    manifest,
};

#[derive(Parser)]
#[command(name = "flarelaunch")]
#[command(about = "Provision and deploy a project to Cloudflare")]
#[command(version)]
struct Cli {
    /// Project configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging and live wrangler output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision every resource and deploy the build output
    Deploy,

    /// List the accounts visible to the current credential
    Accounts,

    /// List the zones of an account
    Zones {
        /// Account id; defaults to the configured or only account
        #[arg(long)]
        account: Option<String>,
    },

    /// Write the initial wrangler.toml for the configured project
    Init,

    /// Check the configuration file without touching Cloudflare
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Deploy => cmd_deploy(&cli.config, cli.verbose),
        Command::Accounts => cmd_accounts(),
        Command::Zones { account } => cmd_zones(&cli.config, account.as_deref()),
        Command::Init => cmd_init(&cli.config),
        Command::Validate => cmd_validate(&cli.config),
    }
}

fn load(path: &Path, verbose: bool) -> anyhow::Result<LaunchConfig> {
    let mut config = LaunchConfig::load(path)?;
    config.deployment.verbose |= verbose;
    Ok(config)
}

fn operator_api() -> anyhow::Result<HttpApi> {
    Ok(HttpApi::new(Identity::from_env()?)?)
}

fn cmd_deploy(path: &Path, verbose: bool) -> anyhow::Result<()> {
    let config = load(path, verbose)?;
    let api = operator_api()?;
    let wrangler = Wrangler::new(config.deployment.verbose);

    eprintln!("Deploying '{}'", config.project.name);
    let report = Pipeline::new(&config, &api, &wrangler).run()?;
    print_summary(&report);
    Ok(())
}

fn cmd_accounts() -> anyhow::Result<()> {
    let api = operator_api()?;
    for account in discovery::list_accounts(&api)? {
        println!("{}\t{}", account.id, account.name);
    }
    Ok(())
}

fn cmd_zones(path: &Path, account: Option<&str>) -> anyhow::Result<()> {
    let api = operator_api()?;
    let account_id = match account {
        Some(id) => id.to_string(),
        None => {
            let cloudflare = if path.exists() {
                LaunchConfig::load(path)?.cloudflare
            } else {
                CloudflareConfig::default()
            };
            discovery::resolve_account(&api, &cloudflare)?.id
        }
    };

    for zone in discovery::list_zones(&api, &account_id)? {
        println!("{}\t{}", zone.id, zone.name);
    }
    Ok(())
}

fn cmd_init(path: &Path) -> anyhow::Result<()> {
    let config = LaunchConfig::load(path)?;
    config.validate()?;
    let target = &config.project.manifest;
    if manifest::ensure(target, &config)? {
        eprintln!("Wrote {}", target.display());
    } else {
        eprintln!("{} already exists, left untouched", target.display());
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = LaunchConfig::load(path)?;
    config.validate()?;
    let features = config.features();
    eprintln!("{} is valid", path.display());
    eprintln!("  project:  {}", config.project.name);
    eprintln!("  database: {}", enabled(features.database));
    eprintln!("  storage:  {}", enabled(features.storage));
    eprintln!("  access:   {}", enabled(features.access));
    eprintln!("  dns:      {}", enabled(features.dns));
    eprintln!("  url:      {}", config.site_url());
    Ok(())
}

const fn enabled(on: bool) -> &'static str {
    if on { "enabled" } else { "disabled" }
}

fn print_summary(report: &PipelineReport) {
    eprintln!();
    eprintln!("Resources:");
    for resource in &report.resources {
        eprintln!("  {resource}");
    }
    eprintln!(
        "{} created, {} reused",
        report.created(),
        report.reused()
    );

    if !report.notices.is_empty() {
        eprintln!();
        eprintln!("Notices:");
        for notice in &report.notices {
            eprintln!("  - {notice}");
        }
    }

    if let Some(url) = &report.deployment_url {
        eprintln!();
        eprintln!("Preview: {url}");
    }
    eprintln!();
    println!("{}", report.url);
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<LaunchError>() {
        Some(LaunchError::StepFailed {
            step,
            provisioned,
            source,
        }) => {
            eprintln!("Error: step '{step}' failed: {source}");
            if provisioned.is_empty() {
                eprintln!("Nothing was provisioned.");
            } else {
                eprintln!("Provisioned before the failure:");
                for resource in provisioned {
                    eprintln!("  {resource}");
                }
            }
            if !matches!(step, Step::Prepare | Step::Discovery | Step::Credential) {
                eprintln!("The scoped token has been revoked. Re-run to resume.");
            }
        }
        _ => eprintln!("Error: {err:#}"),
    }
}
