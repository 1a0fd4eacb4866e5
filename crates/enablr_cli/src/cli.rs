use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Operate the Enablr reminder store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save individuals from a JSON file and reconcile their reminders
    ///
    /// Example: enablr import individuals.json
    Import { path: PathBuf },
    /// Regenerate today's remaining reminders for every individual
    ///
    /// Only the current local day is generated, so run this on a schedule,
    /// e.g. every two hours from cron.
    Sweep,
    /// Reconcile change events read as JSON lines from stdin
    ///
    /// Example: echo '{"target_type":"ALL"}' | enablr consume
    Consume,
    /// List reminders of one task after an instant (default: now)
    Reminders {
        individual_id: String,
        task_id: String,
        #[arg(long)]
        since: Option<i64>,
        #[arg(long, value_enum)]
        unit: Option<Unit>,
    },
    /// Mark one reminder complete
    ///
    /// Example: enablr complete ind-1 t1 1709238600 --note "done at breakfast"
    Complete {
        individual_id: String,
        task_id: String,
        due: i64,
        #[arg(long, value_enum)]
        unit: Option<Unit>,
        #[arg(short = 'n', long, default_value = "")]
        note: String,
    },
}

/// Unit of an epoch argument; guessed from its magnitude when omitted.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Unit {
    Seconds,
    Millis,
}
