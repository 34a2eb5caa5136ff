// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`   — multi-task pre-training on JSON-lines data
//   2. `inspect` — print the assembled features of a few examples
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, TrainArgs};

use crate::application::{inspect_use_case::ExampleView, pretrain_use_case::PretrainConfig};

#[derive(Parser, Debug)]
#[command(
    name = "lxmert-pretrain",
    version = "0.1.0",
    about = "Vision-language pre-training: masked LM, object prediction, matching and QA."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Inspect(args) => run_inspect(args),
        }
    }
}

/// Handles the `train` subcommand.
fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::pretrain_use_case::PretrainUseCase;

    tracing::info!("Starting pre-training on '{}'", args.common.train);
    let config: PretrainConfig = args.into();
    let output = config.output_dir.clone();
    PretrainUseCase::new(config).execute()?;

    println!("Training complete. Checkpoints in '{output}'.");
    Ok(())
}

/// Handles the `inspect` subcommand.
fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let count  = args.count;
    let config: PretrainConfig = args.into();
    for view in InspectUseCase::new(config, count).execute()? {
        print_view(&view);
    }
    Ok(())
}

fn print_view(view: &ExampleView) {
    println!("── {} ──", view.uid);
    for ch in &view.channels {
        println!("  {:<13} {}", ch.name, ch.tokens.join(" "));
        println!("  {:<13} {}  ({} masked)", "", ch.lm_labels.join(" "), ch.masked);
    }
    println!(
        "  visual        {}/{} boxes masked | is_matched={} ans_matched={}",
        view.masked_boxes, view.num_boxes, view.is_matched, view.ans_matched
    );
    println!(
        "  answers       ans={} (type {}) replace_ans={} (type {})",
        view.ans.as_deref().unwrap_or("-"),
        view.ans_type,
        view.replace_ans.as_deref().unwrap_or("-"),
        view.ans_rps_type,
    );
}
