use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::UserLeagueLink;
use crate::orchestrator::{RunReport, SlotOutcome};

#[derive(Parser)]
#[command(name = "leaguesync")]
#[command(version = "0.1.0")]
#[command(about = "League instance resolution and history sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,

    /// Use the in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations
    Migrate,
    /// League catalog maintenance
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Synchronize one user
    Sync {
        /// User id
        #[arg(short, long)]
        user: Uuid,
        /// Replay a recorded snapshot instead of running the agent
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Synchronize every user with valid credentials
    SyncAll,
    /// Execute due tactics captures
    TacticsWorker {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
    /// Show a user's league links
    Links {
        /// User id
        #[arg(short, long)]
        user: Uuid,
    },
}

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Upsert configuration types from a JSON file
    Import {
        /// JSON array of {name, roster}
        file: PathBuf,
    },
}

pub fn print_run_report(report: &RunReport) {
    println!("\n=== Run {} ===", report.user_id);
    println!("attempts: {}", report.attempts);

    for slot in &report.slots {
        match &slot.outcome {
            SlotOutcome::Synced {
                instance_id,
                league_name,
                created,
                facts,
            } => {
                println!(
                    "  slot {}: {} -> instance {}{}",
                    slot.slot_index,
                    league_name,
                    instance_id,
                    if *created { " (new)" } else { "" }
                );
                println!(
                    "    transfers {} (+{}), market {} active / {} expired, matches {} (+{}), tactics {}, rejected {}",
                    facts.transfers,
                    facts.new_transfers,
                    facts.market_active,
                    facts.market_expired,
                    facts.matches,
                    facts.new_matches,
                    facts.tactics,
                    facts.rejected
                );
            }
            SlotOutcome::Skipped { reason } => {
                println!("  slot {}: skipped ({})", slot.slot_index, reason);
            }
            SlotOutcome::Failed { reason } => {
                println!("  slot {}: FAILED ({})", slot.slot_index, reason);
            }
        }
    }

    if report.deactivation_limited {
        println!(
            "links deactivated: {} (limited: a slot failed before claiming)",
            report.deactivated_links
        );
    } else {
        println!("links deactivated: {}", report.deactivated_links);
    }
    println!("tactics tasks scheduled: {}", report.tasks_scheduled);
}

pub fn print_links(user_id: Uuid, links: &[UserLeagueLink]) {
    println!("\n=== Links for {} ===", user_id);
    if links.is_empty() {
        println!("(none)");
        return;
    }
    println!("{:<10} {:<8} {:<10} {:<25}", "Instance", "Active", "Managers", "Last scraped");
    println!("{}", "-".repeat(56));
    for link in links {
        println!(
            "{:<10} {:<8} {:<10} {:<25}",
            link.league_instance_id,
            if link.is_active { "yes" } else { "no" },
            link.managers_by_team.len(),
            link.last_scraped_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
}
