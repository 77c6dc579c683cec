//! seqmine CLI
//! Orchestrates mine, eval, check, and optimize commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser as ClapParser, Subcommand};
use miette::{miette, Result};

use seqmine::lang::{parser, printer};
use seqmine::mine::manager::SequenceManager;
use seqmine::mine::miner::{self, Miner};
use seqmine::mine::config::ConfigLoader;
use seqmine::opt::minimizer::Minimizer;
use seqmine::sys::progress::ProgressMonitor;
use seqmine::sys::{log, setup};
use seqmine::{Evaluator, Settings, Uid};

#[derive(ClapParser)]
#[command(
    name = "seqmine",
    version = "0.1.0",
    about = "Mining engine for integer sequence programs",
    long_about = "seqmine: generate, match, optimize, and store programs reproducing integer sequences."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mining loop
    Mine {
        /// Miner profile name or index from miners.json
        #[arg(short, long, default_value = "")]
        profile: String,
        /// Fork this many mining processes and supervise them
        #[arg(long)]
        parallel: Option<usize>,
        /// Mutate a base program instead of generating candidates
        #[arg(long)]
        base: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(long)]
        target_seconds: Option<u64>,
    },
    /// Evaluate a program to a number of sequence terms
    Eval {
        path: PathBuf,
        /// Number of terms
        #[arg(short = 'n', long, default_value_t = 10)]
        terms: usize,
        /// Print in b-file form (`<index> <value>` lines)
        #[arg(short, long)]
        b_file: bool,
    },
    /// Check a program against a sequence
    Check {
        path: PathBuf,
        /// Target sequence identifier, e.g. A000045
        id: String,
    },
    /// Optimize and minimize a program
    Optimize {
        path: PathBuf,
        /// Number of terms that must be preserved
        #[arg(short = 'n', long, default_value_t = 20)]
        terms: usize,
    },
    /// Show the configured directories and profiles
    Setup,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        log::set_level(log::Level::Debug);
    }
    match cli.command {
        Commands::Mine {
            profile,
            parallel,
            base,
            target_seconds,
        } => {
            if let Some(instances) = parallel {
                return miner::mine_parallel(instances.max(1))
                    .map_err(|e| miette!("Parallel mining failed: {}", e));
            }
            let mut settings = Settings::default();
            settings.miner_profile = profile;
            let mut miner =
                Miner::new(settings).map_err(|e| miette!("Cannot initialize miner: {}", e))?;
            if let Some(path) = base {
                let program = parser::parse_file(&path)
                    .map_err(|e| miette!("Cannot read '{}': {}", path.display(), e))?;
                miner.set_base_program(program);
            }
            if let Some(seconds) = target_seconds {
                miner.set_progress_monitor(Arc::new(ProgressMonitor::new(
                    seconds,
                    Some(setup::home_dir().join("progress.txt")),
                    None,
                    0,
                )));
            }
            miner.mine().map_err(|e| miette!("Mining failed: {}", e))?;
        }

        Commands::Eval { path, terms, b_file } => {
            let program = parser::parse_file(&path)
                .map_err(|e| miette!("Cannot read '{}': {}", path.display(), e))?;
            let mut evaluator = Evaluator::new(Settings::default());
            let (seq, steps) = evaluator
                .eval(&program, terms)
                .map_err(|e| miette!("Evaluation failed: {}", e))?;
            if b_file {
                print!("{}", seq.to_b_file(program.offset()));
            } else {
                println!("{}", seq);
            }
            log::debug(&format!("Total steps: {}", steps.total));
        }

        Commands::Check { path, id } => {
            let program = parser::parse_file(&path)
                .map_err(|e| miette!("Cannot read '{}': {}", path.display(), e))?;
            let uid: Uid = id
                .parse()
                .map_err(|_| miette!("Invalid sequence identifier '{}'", id))?;
            let settings = Settings::default();
            let profile = ConfigLoader::load(&settings.miner_profile)
                .map_err(|e| miette!("Cannot load configuration: {}", e))?;
            let mut manager = SequenceManager::new(settings, profile);
            manager
                .load()
                .map_err(|e| miette!("Cannot load sequence index: {}", e))?;
            let matched = miner::check_against(&mut manager, uid, &program)
                .map_err(|e| miette!("Check failed: {}", e))?;
            if matched == 0 {
                return Err(miette!("Program does not match {}", uid));
            }
            println!("ok ({} terms)", matched);
        }

        Commands::Optimize { path, terms } => {
            let mut program = parser::parse_file(&path)
                .map_err(|e| miette!("Cannot read '{}': {}", path.display(), e))?;
            let mut minimizer = Minimizer::new(Settings::default());
            minimizer.optimize_and_minimize(&mut program, terms);
            print!("{}", printer::print_program(&program));
        }

        Commands::Setup => {
            println!("home:     {}", setup::home_dir().display());
            println!("seqs:     {}", setup::seqs_home().display());
            println!("programs: {}", setup::programs_home().display());
            println!("stats:    {}", setup::stats_home().display());
            println!("lists:    {}", setup::lists_home().display());
            match ConfigLoader::load("") {
                Ok(profile) => println!("profile:  {}", profile.name),
                Err(e) => println!("profile:  (error: {})", e),
            }
        }
    }
    Ok(())
}
