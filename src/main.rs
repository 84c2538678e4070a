use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use modelshift::{ChainFixture, ChainLayout, DbError, Model, RenameHints, Store, UpgradeConfig, Upgrader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "modelshift")]
#[command(about = "Plans and applies model upgrades to table-per-hierarchy entity stores")]
struct Cli {
    /// Store file; created on first write.
    #[arg(long, global = true, default_value = "modelshift.store")]
    store: PathBuf,

    /// Upgrade settings as JSON.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the plan that would upgrade the part named by the model, without applying it.
    Plan {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        hints: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },
    /// Upgrades the part named by the model and verifies the surviving rows.
    Upgrade {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        hints: Option<PathBuf>,
    },
    /// Exports the deployed catalog of a part as JSON.
    Catalog {
        #[arg(long)]
        part: String,
    },
    /// Deploys the hierarchy chain model and populates one row per type.
    Fixture {
        #[command(flatten)]
        chain: ChainArgs,
    },
    /// Checks the populated rows of the hierarchy chain.
    Check {
        #[command(flatten)]
        chain: ChainArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Sql,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Independent,
    Inheritance,
}

#[derive(clap::Args)]
struct ChainArgs {
    #[arg(long)]
    part: String,
    #[arg(long, default_value_t = 100)]
    depth: usize,
    #[arg(long, value_enum, default_value_t = LayoutArg::Inheritance)]
    layout: LayoutArg,
    #[arg(long, default_value = "T")]
    prefix: String,
    /// Use the second revision of the chain.
    #[arg(long)]
    evolved: bool,
}

impl ChainArgs {
    fn fixture(&self) -> ChainFixture {
        let layout = match self.layout {
            LayoutArg::Independent => ChainLayout::Independent,
            LayoutArg::Inheritance => ChainLayout::Inheritance,
        };
        let fixture = ChainFixture::new(&self.part, self.depth, layout).with_prefix(&self.prefix);
        if self.evolved { fixture.evolve() } else { fixture }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelshift=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => UpgradeConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => UpgradeConfig::default(),
    };

    match cli.command {
        Command::Plan { model, hints, format } => {
            let store = open_store(&cli.store)?;
            let model = load_model(&model)?;
            let plan = Upgrader::new(&store)
                .with_config(config)
                .with_hints(load_hints(hints.as_deref())?)
                .plan(&model)?;
            match format {
                PlanFormat::Text => print!("{}", plan),
                PlanFormat::Sql => print!("{}", plan.to_sql()),
                PlanFormat::Json => println!("{}", plan.to_json()?),
            }
        }
        Command::Upgrade { model, hints } => {
            let store = open_store(&cli.store)?;
            let model = load_model(&model)?;
            let outcome = Upgrader::new(&store)
                .with_config(config)
                .with_hints(load_hints(hints.as_deref())?)
                .upgrade(&model);
            // Verification failures are reported after commit, so the store is saved either way.
            let committed = match &outcome {
                Ok(_) => true,
                Err(err) => matches!(err, DbError::Verification(_)),
            };
            if committed {
                store
                    .save(&cli.store)
                    .with_context(|| format!("failed to save store {}", cli.store.display()))?;
            }
            let outcome = outcome.context("upgrade failed")?;
            println!("{}", outcome);
        }
        Command::Catalog { part } => {
            let store = open_store(&cli.store)?;
            let catalog = store.catalog(&part)?;
            if catalog.is_empty() {
                bail!("part '{}' has no deployed types", part);
            }
            println!("{}", catalog.to_json()?);
        }
        Command::Fixture { chain } => {
            let store = open_store(&cli.store)?;
            let fixture = chain.fixture();
            let model = fixture.model().context("fixture model is invalid")?;
            Upgrader::new(&store)
                .with_config(config)
                .upgrade(&model)
                .context("failed to deploy fixture model")?;
            let rows = fixture.populate(&store)?;
            store
                .save(&cli.store)
                .with_context(|| format!("failed to save store {}", cli.store.display()))?;
            println!("populated {} rows into part '{}'", rows, fixture.part);
        }
        Command::Check { chain } => {
            let store = open_store(&cli.store)?;
            let report = chain.fixture().check(&store, &config)?;
            print!("{}", report);
            if !report.is_ok() {
                bail!("{} mismatched fields", report.failures.len());
            }
            println!();
        }
    }
    Ok(())
}

fn open_store(path: &Path) -> Result<Store> {
    Store::open_or_create(path).with_context(|| format!("failed to open store {}", path.display()))
}

fn load_model(path: &Path) -> Result<Model> {
    let json = fs::read_to_string(path).with_context(|| format!("failed to read model {}", path.display()))?;
    Model::from_json(&json).with_context(|| format!("invalid model document {}", path.display()))
}

fn load_hints(path: Option<&Path>) -> Result<RenameHints> {
    match path {
        Some(path) => {
            RenameHints::from_file(path).with_context(|| format!("failed to read rename hints {}", path.display()))
        }
        None => Ok(RenameHints::default()),
    }
}
