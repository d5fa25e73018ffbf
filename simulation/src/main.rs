//! MADAODV mesh simulator
//!
//! Runs pre-built scenarios of reactive routing with gateway discovery on a
//! virtual clock.

use clap::{Parser, Subcommand};
use madaodv_logging::{LogConfig, MadaodvSubscriberBuilder};

use madaodv_simulation::{Simulation, scenarios};

#[derive(Parser)]
#[command(
    name = "madaodv-sim",
    about = "Mesh simulation of MADAODV reactive routing with gateway discovery",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the final statistics as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route discovery along a line, first node to last
    Line {
        /// Number of nodes
        #[arg(short, long, default_value = "4")]
        nodes: u32,
    },

    /// Traffic to a host outside the mesh through an uplink node
    Gateway {
        /// Number of nodes; the last one is the gateway
        #[arg(short, long, default_value = "4")]
        nodes: u32,
    },

    /// Route repair after a mid-path link failure
    LinkBreak,

    /// Grid traffic, then every node's routing table
    Table {
        #[arg(long, default_value = "3")]
        width: u32,

        #[arg(long, default_value = "3")]
        height: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = MadaodvSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .with_level(if cli.verbose { "debug" } else { "info" })
        .init();

    let sim = match cli.command {
        Commands::Line { nodes } => scenarios::run_line_scenario(nodes)?,
        Commands::Gateway { nodes } => scenarios::run_gateway_scenario(nodes)?,
        Commands::LinkBreak => scenarios::run_link_break_scenario()?,
        Commands::Table { width, height } => scenarios::run_table_scenario(width, height)?,
    };

    if cli.json {
        print_json(&sim)?;
    }
    Ok(())
}

fn print_json(sim: &Simulation) -> anyhow::Result<()> {
    let report = serde_json::json!({
        "stats": sim.stats,
        "deliveries": sim.deliveries,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
