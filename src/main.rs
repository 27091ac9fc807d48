//! TileTune Command Line Interface
//!
//! Usage:
//!   tiletune [OPTIONS] <COMMAND>
//!   tiletune --help
//!
//! Examples:
//!   tiletune plans -p conv.json --only-po2           # Enumerate tile plans once
//!   tiletune tiles -p conv.json -o tiled.json        # Next window of tiled blocks
//!   tiletune start-build                             # Before building a window
//!   tiletune built "16 4 FEATURES:2 2 ..."           # After each built tile
//!   tiletune tested 41                               # After testing finished
//!   tiletune predict -m models "16 4 FEATURES:..."   # Score a stamped block

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tiletune::analysis::{extract_features, feature_hash, target_features_str, FEATURE_HEAD};
use tiletune::autotuning::{generate_plans, generate_tiles, AutotuneConfig, TileStrategy, TrainStatus};
use tiletune::cost_model::{CostModelInvoker, MODEL_LIST_FILE};
use tiletune::ir::Statement;

/// TileTune - tile plan autotuning for block IR
#[derive(Parser, Debug)]
#[command(name = "tiletune")]
#[command(version)]
#[command(about = "Tile plan enumeration and cost-model driven autotuning", long_about = None)]
struct Cli {
    /// Training directory holding the plan and status files
    #[arg(long, env = "CM_TRAIN_DIR", value_name = "DIR", global = true)]
    train_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate the tile plans of a program's target block
    Plans {
        /// Program file (JSON block tree)
        #[arg(short, long, value_name = "FILE")]
        program: PathBuf,

        #[command(flatten)]
        options: PlanArgs,
    },

    /// Materialize the next window of plans as tiled blocks
    Tiles {
        /// Program file (JSON block tree)
        #[arg(short, long, value_name = "FILE")]
        program: PathBuf,

        /// Output program (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: TileArgs,
    },

    /// Show the training progress
    Status,

    /// Record that tiles up to ID were tested
    Tested { id: i64 },

    /// Record that plan ID failed
    Fail { id: i64 },

    /// Mark the generated window as about to be built
    StartBuild,

    /// Count one built tile from its feature line
    Built { feature: String },

    /// Print the features of a program's target block and stamped blocks
    Features {
        /// Program file (JSON block tree)
        #[arg(short, long, value_name = "FILE")]
        program: PathBuf,
    },

    /// Score feature lines with the cost models
    Predict {
        /// Directory holding the model catalogue and model files
        #[arg(short, long, value_name = "DIR")]
        model_dir: PathBuf,

        /// Catalogue file name
        #[arg(long, default_value = MODEL_LIST_FILE)]
        model_list: String,

        /// Feature lines (`... FEATURES:...`)
        #[arg(required = true)]
        features: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Byte budget for the refinements of one tile
    #[arg(long)]
    max_mem_size: Option<u64>,

    /// Round tiled dimensions up to odd sizes
    #[arg(long)]
    odd_size: bool,

    /// Never split accumulation indices
    #[arg(long)]
    no_acc_idxs: bool,

    /// Only factors that divide the range
    #[arg(long)]
    only_even: bool,

    /// Only powers of two or the full range
    #[arg(long)]
    only_po2: bool,
}

#[derive(Args, Debug)]
struct TileArgs {
    /// Plans per window
    #[arg(long)]
    max_plans: Option<usize>,

    /// Cap on generated blocks per window
    #[arg(long)]
    max_blocks: Option<usize>,

    /// Interleave tiles
    #[arg(long)]
    interleave: bool,

    /// Materialization strategy
    #[arg(long)]
    strategy: Option<StrategyArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// One block per refinement, other refinements zeroed
    PerRefinement,
    /// One block per plan
    WholeBlock,
}

impl From<StrategyArg> for TileStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::PerRefinement => TileStrategy::PerRefinement,
            StrategyArg::WholeBlock => TileStrategy::WholeBlock,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("TileTune v{}", tiletune::VERSION);

    let mut config = match &cli.config {
        Some(path) => AutotuneConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {:?}", path))?,
        None => AutotuneConfig::default(),
    };
    if cli.train_dir.is_some() {
        config.train_dir = cli.train_dir.clone();
    }
    debug!("Configuration: {:?}", config);

    match cli.command {
        Command::Plans { program, options } => {
            apply_plan_args(&mut config, &options);
            let train_dir = config.train_dir()?;
            let prog = load(&program)?;
            match generate_plans(&prog, train_dir, &config.plans)? {
                Some(count) => println!("{} plans", count),
                None => println!("plan file already exists"),
            }
        }
        Command::Tiles {
            program,
            output,
            options,
        } => {
            apply_tile_args(&mut config, &options);
            let train_dir = config.train_dir()?;
            let mut prog = load(&program)?;
            match generate_tiles(&mut prog, train_dir, &config.tiles)? {
                Some(window) => {
                    info!(
                        "tiles {}..={} from plans {}..={}",
                        window.first_tile, window.last_tile, window.first_plan, window.last_plan
                    );
                    let text = serde_json::to_string_pretty(&prog)?;
                    write_output(&output, &text)?;
                }
                None => {
                    warn!("nothing left to generate");
                }
            }
        }
        Command::Status => {
            let mut status = TrainStatus::new(config.train_dir()?);
            let summary = status.summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Tested { id } => {
            TrainStatus::new(config.train_dir()?).set_last_tested_tile(id)?;
        }
        Command::Fail { id } => {
            TrainStatus::new(config.train_dir()?).add_failed_tile(id)?;
        }
        Command::StartBuild => {
            TrainStatus::new(config.train_dir()?).start_build_tiles()?;
        }
        Command::Built { feature } => {
            let mut status = TrainStatus::new(config.train_dir()?);
            if !status.built_one_tile(&feature)? {
                debug!("'{}' has no {} marker", feature, FEATURE_HEAD);
            }
        }
        Command::Features { program } => {
            let prog = load(&program)?;
            print_features(&prog)?;
        }
        Command::Predict {
            model_dir,
            model_list,
            features,
        } => {
            let mut invoker = CostModelInvoker::load(&model_dir, &model_list)
                .with_context(|| format!("Failed to load cost models from {:?}", model_dir))?;
            for line in &features {
                match invoker.predict_comment(line)? {
                    Some(score) => println!("{}", score),
                    None => println!("-"),
                }
            }
        }
    }

    Ok(())
}

fn apply_plan_args(config: &mut AutotuneConfig, args: &PlanArgs) {
    if let Some(bytes) = args.max_mem_size {
        config.plans.max_mem_size = bytes;
    }
    if args.odd_size {
        config.plans.odd_size = true;
    }
    if args.no_acc_idxs {
        config.plans.acc_idxs = false;
    }
    if args.only_even {
        config.plans.only_even = true;
    }
    if args.only_po2 {
        config.plans.only_po2 = true;
    }
}

fn apply_tile_args(config: &mut AutotuneConfig, args: &TileArgs) {
    if let Some(n) = args.max_plans {
        config.tiles.max_plans = n;
    }
    if let Some(n) = args.max_blocks {
        config.tiles.max_blocks = n;
    }
    if args.interleave {
        config.tiles.interleave = true;
    }
    if let Some(strategy) = args.strategy {
        config.tiles.strategy = strategy.into();
    }
}

fn load(path: &Path) -> Result<tiletune::ir::Block> {
    tiletune::load_program(path).with_context(|| format!("Failed to read program: {:?}", path))
}

fn print_features(program: &tiletune::ir::Block) -> Result<()> {
    let target = target_features_str(program)?;
    println!("target {:016x} {}", feature_hash(&target), target);
    for stmt in &program.stmts {
        let Statement::Block(block) = stmt else {
            continue;
        };
        if !block.comments.contains(FEATURE_HEAD) {
            continue;
        }
        let (key, values) = extract_features(&block.comments)
            .with_context(|| format!("Bad feature comment in block '{}'", block.name))?;
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        println!("{} [{}] {}", block.name, key, values.join(" "));
    }
    Ok(())
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            std::fs::write(p, content).with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
