use crate::config::types::{HarnessEnv, RunnerOptions, SuiteReport};
use crate::interactor::driver::{run_interactor, InteractorArgs};
use crate::interactor::InteractorOutcome;
use crate::runner::{write_report, SuiteRunner};
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    /// `judgebox`: run the test suite of the current problem directory
    Runner,
    /// `judgebox-interactor`: drive a scripted conversation
    Interactor,
}

#[derive(Parser, Debug)]
#[command(name = "judgebox", author, version, about = "Run a problem's test suite against a candidate", long_about = None)]
struct RunnerCli {
    /// Record produced output as the reference answers
    #[arg(long)]
    prepare_answers: bool,
    /// File the candidate writes its answer to (relative to the run directory)
    #[arg(long)]
    output_file: Option<String>,
    /// Command starting the candidate
    #[arg(long, default_value = "./solution")]
    run_cmd: String,
    /// cmp, sorted-lines, cmp-double, cmp-double-seq, ignore-spaces, ignore or a checker path
    #[arg(long, default_value = "cmp")]
    checker: String,
    /// Interactor program for interactive problems
    #[arg(long)]
    interactor: Option<PathBuf>,
    /// Setup/teardown helper run around every test
    #[arg(long)]
    initializer: Option<String>,
    /// Keep the initializer running during the test and interrupt it afterwards
    #[arg(long)]
    initializer_run_till_end: bool,
    /// Tests whose failures are tolerated outside the pipeline
    #[arg(long, num_args = 1..)]
    may_fail_local: Vec<String>,
    /// Run the candidate as this user (pipeline only)
    #[arg(long)]
    user: Option<String>,
    /// Token in the run command standing for the input file
    #[arg(long, default_value = "input.txt")]
    input_filename: String,
    /// Copy fixture directories instead of symlinking them
    #[arg(long)]
    static_copy: bool,
    /// How many times to run the whole suite
    #[arg(long, default_value_t = 1)]
    retests_count: u32,
    /// Attempts per test
    #[arg(long, default_value_t = 1)]
    retries_count: u32,
    /// Directory with the test fixtures
    #[arg(long, default_value = "tests")]
    tests_dir: PathBuf,
    /// Write a JSON report of the suite here
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunnerCli {
    fn into_options(self, problem_dir: PathBuf) -> RunnerOptions {
        RunnerOptions {
            problem_dir,
            tests_dir: self.tests_dir,
            prepare_answers: self.prepare_answers,
            output_file: self.output_file,
            run_cmd: self.run_cmd,
            checker: self.checker,
            interactor: self.interactor,
            initializer: self.initializer,
            initializer_run_till_end: self.initializer_run_till_end,
            may_fail_local: self.may_fail_local,
            user: self.user,
            input_filename: self.input_filename,
            static_copy: self.static_copy,
            retests_count: self.retests_count,
            retries_count: self.retries_count,
            report: self.report,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "judgebox-interactor", author, version, about = "Scripted multi-connection interactor", long_about = None)]
struct InteractorCli {
    /// Conversation script
    script: PathBuf,
    /// Conversation log to write
    output: PathBuf,
    /// Reference answer (unused by the scripted protocol)
    reference: PathBuf,
    /// Candidate pid, empty when unknown
    pid: String,
    /// Metadata record with `params = <port> <unix socket>`
    info: Option<String>,
}

impl InteractorCli {
    fn into_args(self) -> Result<InteractorArgs> {
        let pid = match self.pid.trim() {
            "" => None,
            raw => Some(raw.parse::<i32>().with_context(|| format!("Bad candidate pid {:?}", raw))?),
        };
        Ok(InteractorArgs {
            script: self.script,
            output: self.output,
            reference: self.reference,
            pid,
            info: self.info.filter(|s| !s.is_empty()).map(PathBuf::from),
        })
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

pub fn run(mode: CliMode) -> Result<()> {
    init_logging();

    match mode {
        CliMode::Runner => run_suite(),
        CliMode::Interactor => {
            let outcome = match parse_interactor_args(std::env::args_os()) {
                Ok(args) => run_interactor(&args),
                Err(e) => {
                    error!("{:#}", e);
                    InteractorOutcome::Crash
                }
            };
            info!("Interactor finished: {:?}", outcome);
            std::process::exit(outcome.exit_code());
        }
    }
}

/// Invocation faults are reported as a crash, never as a candidate verdict
fn parse_interactor_args<I, T>(argv: I) -> Result<InteractorArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match InteractorCli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => return Err(anyhow::anyhow!("Bad interactor invocation: {}", e)),
    };
    cli.into_args()
}

fn run_suite() -> Result<()> {
    let cli = RunnerCli::parse();
    let env = HarnessEnv::from_env()?;
    let problem_dir = std::env::current_dir().context("Failed to read the current directory")?;
    let options = cli.into_options(problem_dir);
    let report_path = options.report.clone();

    let mut report = SuiteReport::default();
    let result = SuiteRunner::new(options, env).and_then(|runner| runner.run(&mut report));

    if let Some(path) = report_path {
        write_report(&path, &report)?;
    }
    if let Err(e) = &result {
        error!("{}", e);
    }
    result.map_err(Into::into)
}
