//! Droid Autobot - scripted Android automation over ADB
//!
//! Runs each script given on the command line against the configured device.
//! Run with: cargo run --bin droid-autobot -- scripts/daily.json

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use droid_autobot::{AdbController, ExecutorConfig, ScriptOutcome, Settings, TaskExecutor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() || paths.iter().any(|a| a == "-h" || a == "--help") {
        println!("Usage: droid-autobot <script.json>...");
        println!();
        println!("Environment: ADB_HOST, ADB_PORT, ADB_DEVICE, AUTOBOT_WORK_DIR,");
        println!("             AUTOBOT_SCRIPT_DIR, AUTOBOT_TEMPLATE_DIR, RUST_LOG");
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load().with_env_overrides();
    let controller = Arc::new(
        AdbController::from_settings(&settings).context("Invalid device address in settings")?,
    );

    println!("🤖 Droid Autobot");
    println!("================================================");
    println!("ADB server: {}:{}", settings.adb_host, settings.adb_port);
    println!("Device: {}", controller.device());
    println!("Work dir: {}", settings.work_dir.display());
    println!("================================================\n");

    if !controller.connect().await {
        anyhow::bail!("Could not connect to {}", controller.device());
    }

    let executor = TaskExecutor::new(controller.clone(), ExecutorConfig::from(&settings));
    let mut failures = 0;

    for path in &paths {
        let name = match executor.load(path) {
            Ok(name) => name,
            Err(e) => {
                eprintln!("❌ {}: {}", path, e);
                failures += 1;
                continue;
            }
        };

        println!("📝 Script: {}", name);
        let report = executor.run(&name).await;
        match &report.outcome {
            ScriptOutcome::Succeeded => println!(
                "✅ {} finished ({} iterations, {:.1}s)\n",
                report.name,
                report.iterations_completed,
                report.elapsed.as_secs_f64()
            ),
            ScriptOutcome::Failed { step, description } => {
                failures += 1;
                eprintln!("❌ {} failed at step {}: {}\n", report.name, step, description);
            }
            ScriptOutcome::Cancelled => {
                failures += 1;
                eprintln!("⚠️ {} cancelled\n", report.name);
            }
            ScriptOutcome::LoadFailed(reason) => {
                failures += 1;
                eprintln!("❌ {}: {}\n", report.name, reason);
            }
        }
    }

    controller.disconnect().await;

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
