//! forgebill runner
//!
//! Runs one engine operation against a JSON fixture and prints the result as
//! JSON, the way a cron job or an operator would drive the engine.
//!
//! # Usage
//!
//! ```bash
//! forgebill-runner fixtures/demo.json generate 2025 1
//! forgebill-runner fixtures/demo.json daily 2025-02-01
//! forgebill-runner fixtures/demo.json stats 1 2025 1
//! forgebill-runner fixtures/demo.json calculate 10 2025-01-01 2025-01-31
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde::Serialize;

use forgebill_core::{CompanyId, ContractId};
use forgebill_infra::{Backends, BillingEngine, Clock, EngineConfig, FixedClock, SystemClock};

mod fixture;

use fixture::Fixture;

#[derive(Parser)]
#[command(name = "forgebill-runner")]
#[command(about = "Run billing operations against a JSON fixture", long_about = None)]
struct Cli {
    /// Fixture with companies, tariffs, contracts and activity
    fixture: PathBuf,

    /// Pretty-print the JSON output
    #[arg(long, env = "FORGEBILL_PRETTY")]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate invoices for a calendar month
    Generate { year: i32, month: u32 },
    /// Mark unpaid invoices past their due date as overdue
    Overdue { date: Option<NaiveDate> },
    /// Perform scheduled deletions that are due
    Deletions { date: Option<NaiveDate> },
    /// Overdue scan, due generation and deletion sweep for one day
    Daily { date: NaiveDate },
    /// Billing statistics for a company
    Stats {
        company: u64,
        year: i32,
        month: Option<u32>,
    },
    /// Price one contract for a period without issuing anything
    Calculate {
        contract: u64,
        start: NaiveDate,
        end: NaiveDate,
    },
}

fn main() -> Result<()> {
    forgebill_observability::init();
    let cli = Cli::parse();

    let fixture = Fixture::load(&cli.fixture)?;
    let clock: Arc<dyn Clock> = match fixture.today {
        Some(today) => Arc::new(FixedClock::new(today.and_time(NaiveTime::MIN).and_utc())),
        None => Arc::new(SystemClock),
    };
    let today = clock.today();

    let config = EngineConfig::from_env()?;
    let (backends, directory) = Backends::in_memory(clock);
    let engine = BillingEngine::new(backends, &config);
    fixture.seed(&directory, &engine)?;

    let automation = engine.automation();
    match cli.command {
        Command::Generate { year, month } => {
            print(&engine.auto_generate_invoices_for_month(year, month)?, cli.pretty)
        }
        Command::Overdue { date } => print(
            &automation.mark_overdue_invoices_as_of(date.unwrap_or(today))?,
            cli.pretty,
        ),
        Command::Deletions { date } => print(
            &automation.process_scheduled_deletions_as_of(date.unwrap_or(today))?,
            cli.pretty,
        ),
        Command::Daily { date } => print(&engine.run_daily(date)?, cli.pretty),
        Command::Stats {
            company,
            year,
            month,
        } => print(
            &engine.get_billing_statistics(CompanyId::new(company), year, month)?,
            cli.pretty,
        ),
        Command::Calculate {
            contract,
            start,
            end,
        } => print(
            &engine.calculate_billing_for_contract(ContractId::new(contract), start, end)?,
            cli.pretty,
        ),
    }
}

fn print<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    tracing::debug!(bytes = out.len(), "result written");
    Ok(())
}
