use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ferrous_synch::synchtest::{self, SynchTestConfig, SynchTestError, SynchTestReport};
use ferrous_synch::{Uniprocessor, UniprocessorConfig};
use log::info;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Kernel heap size in bytes
    #[arg(long, global = true, default_value_t = 1024 * 1024)]
    heap_bytes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TestArgs {
    /// Number of kernel threads to start
    #[arg(long, default_value_t = 32)]
    threads: usize,

    /// Iterations per thread
    #[arg(long, default_value_t = 120)]
    loops: usize,

    /// Do not yield at random points inside critical sections
    #[arg(long)]
    no_stir: bool,
}

impl From<TestArgs> for SynchTestConfig {
    fn from(args: TestArgs) -> Self {
        Self {
            threads: args.threads,
            loops: args.loops,
            stir: !args.no_stir,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Semaphore test
    Sy1(TestArgs),
    /// Lock test
    Sy2(TestArgs),
    /// Condition variable test
    Sy3(TestArgs),
    /// Run sy1, sy2 and sy3 in order
    All(TestArgs),
}

type SynchTest =
    fn(&Arc<Uniprocessor>, &SynchTestConfig) -> Result<SynchTestReport, SynchTestError>;

const SEMTEST: (&str, SynchTest) = ("sy1", synchtest::semtest);
const LOCKTEST: (&str, SynchTest) = ("sy2", synchtest::locktest);
const CVTEST: (&str, SynchTest) = ("sy3", synchtest::cvtest);

fn run(cpu: &Arc<Uniprocessor>, tests: &[(&str, SynchTest)], args: TestArgs) -> Result<()> {
    let config = SynchTestConfig::from(args);
    for (name, test) in tests {
        info!("running {}", name);
        let report = test(cpu, &config).with_context(|| format!("{name} failed"))?;
        println!("{report}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cpu = Uniprocessor::new(UniprocessorConfig {
        heap_bytes: cli.heap_bytes,
    });

    match cli.command {
        Commands::Sy1(args) => run(&cpu, &[SEMTEST], args),
        Commands::Sy2(args) => run(&cpu, &[LOCKTEST], args),
        Commands::Sy3(args) => run(&cpu, &[CVTEST], args),
        Commands::All(args) => run(&cpu, &[SEMTEST, LOCKTEST, CVTEST], args),
    }
}
