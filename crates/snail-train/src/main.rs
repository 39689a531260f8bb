mod config;
mod pipeline;
pub mod results;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::RunArgs;

/// snail-train: episodic training and evaluation of a SNAIL few-shot classifier.
#[derive(Parser)]
#[command(name = "snail-train", version, about)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let results = pipeline::run(cli.run)?;

    println!("\n--- Run Summary ---");
    if let Some(acc) = results.best_val_acc {
        println!("Best val acc: {acc:.4}");
    }
    println!("Last model test acc: {:.4}", results.last_test_acc);
    if let Some(acc) = results.best_test_acc {
        println!("Best model test acc: {acc:.4}");
    }
    Ok(())
}
