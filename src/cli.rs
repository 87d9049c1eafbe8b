//! Flat-flags command line surface: a one-shot tool runs once and exits, so this follows the
//! original script's `argparse` shape rather than a subcommand tree.

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "bluegreen-deploy", about = "Blue/green cutover controller for a Marathon-style scheduler")]
pub struct Cli {
    /// Scheduler base URL, e.g. http://marathon.example.com:8080
    #[arg(short = 'm', long)]
    pub marathon: String,

    /// Proxy fleet base URL, e.g. http://marathon-lb.example.com
    #[arg(short = 'l', long = "marathon-lb")]
    pub marathon_lb: String,

    /// Path to the input app definition JSON file
    #[arg(short = 'j', long)]
    pub json: String,

    /// Print the planned app definition and exit without contacting the scheduler
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Skip confirmation prompts before mutating steps
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Attach to an already in-progress cutover instead of failing on two existing apps
    #[arg(short = 'r', long)]
    pub resume: bool,

    /// Seconds to sleep between reconciliation iterations
    #[arg(short = 's', long = "step-delay", default_value_t = 5)]
    pub step_delay: u64,

    /// Instance count for a newly created app before the controller loop scales it further
    #[arg(short = 'i', long = "initial-instances", default_value_t = 1)]
    pub initial_instances: i64,

    /// Scheduler basic-auth username
    #[arg(long, env = "MARATHON_USER")]
    pub user: Option<String>,

    /// Scheduler basic-auth password
    #[arg(long, env = "MARATHON_PASS")]
    pub pass: Option<String>,

    /// Log verbosity filter (passed through to tracing's EnvFilter)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}
