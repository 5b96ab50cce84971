// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tasker_rs::engine::applet::AppletRegistry;
use tasker_rs::engine::runtime::TaskRuntime;
use tasker_rs::engine::task::{EventRouter, RunOutcome, TaskManager, TaskStateListener, XTask};
use tasker_rs::engine::{EngineConfig, EngineContext, EngineError};
use tasker_rs::tasker::applets::{self, EventTextSupplier};
use tasker_rs::tasker::TaskLoader;

use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML); defaults come from TASKER_* variables
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a task file and print its identity
    Check {
        /// Path to the task file
        file: String,
    },
    /// Run a task against a scripted event sequence
    Run {
        /// Path to the task file
        file: String,

        /// Path to the event script
        #[arg(short, long)]
        events: String,
    },
}

/// Prints every lifecycle callback
struct ConsoleListener;

impl TaskStateListener for ConsoleListener {
    fn on_started(&self, task: &XTask, runtime: &TaskRuntime) {
        println!(
            "[{}] started with {} event(s)",
            task.identifier(),
            runtime.events().len()
        );
    }

    fn on_success(&self, task: &XTask, runtime: &TaskRuntime) {
        println!(
            "[{}] success (fingerprint {:016x})",
            task.identifier(),
            runtime.fingerprint()
        );
    }

    fn on_failure(&self, task: &XTask, runtime: &TaskRuntime) {
        let at = runtime
            .current_applet()
            .map(|n| n.to_string())
            .unwrap_or_default();
        println!("[{}] failure at {}", task.identifier(), at);
    }

    fn on_error(&self, task: &XTask, _runtime: &TaskRuntime, error: &EngineError) {
        println!("[{}] error: {}", task.identifier(), error);
    }

    fn on_cancelled(&self, task: &XTask, _runtime: &TaskRuntime) {
        println!("[{}] cancelled", task.identifier());
    }
}

fn build_context(config: Option<&str>) -> anyhow::Result<Arc<EngineContext>> {
    let config = match config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::from_env()?,
    };
    let registry = AppletRegistry::new();
    applets::register_builtin(&registry);
    let ctx = EngineContext::new(config, registry).with_target_supplier(Arc::new(EventTextSupplier));
    Ok(Arc::new(ctx))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let ctx = build_context(args.config.as_deref())?;
    let loader = TaskLoader::new();

    match args.command {
        Commands::Check { file } => {
            let task = loader.load_task(&ctx, &file)?;
            println!("Task:     {}", task.title());
            println!("Type:     {:?}", task.task_type());
            println!("Checksum: {:016x} ({})", task.checksum(), task.identifier());
            println!("Applets:  {}", task.tree().len());
            let triggers: Vec<String> = task.triggers().iter().map(|t| t.to_string()).collect();
            println!("Triggers: {}", triggers.join(", "));
        }
        Commands::Run { file, events } => {
            let task = loader.load_task(&ctx, &file)?;
            let batches = loader.load_events(&events)?;
            log::info!(
                "Loaded task {} ({}) and {} event batch(es)",
                task.title(),
                task.identifier(),
                batches.len()
            );

            let manager = TaskManager::new(ctx.clone()).with_listener(Arc::new(ConsoleListener));

            if task.is_resident() {
                manager.enable_resident(task.clone()).await?;
                let router = EventRouter::new(manager.clone());
                let mut runs = Vec::new();
                for batch in batches {
                    if batch.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(batch.delay_ms)).await;
                    }
                    runs.extend(router.on_events(batch.events).await);
                    tokio::task::yield_now().await;
                }
                // Runs still parked at a WaitFor are cancelled here
                tokio::time::sleep(Duration::from_millis(50)).await;
                manager.shutdown().await;
                for run in runs {
                    run.await?;
                }
                for snapshot in task.snapshots().list() {
                    println!(
                        "snapshot {} {:?} successes={} failures={} repeats={}",
                        snapshot.id,
                        snapshot.outcome,
                        snapshot.successes,
                        snapshot.failures,
                        snapshot.repeats
                    );
                }
            } else {
                manager.add_oneshot_if_absent(task.clone()).await?;
                let events = batches.into_iter().flat_map(|b| b.events).collect();
                let outcome = manager.launch_oneshot(task.checksum(), events).await?;
                if let RunOutcome::Error(message) = outcome {
                    anyhow::bail!("task failed: {}", message);
                }
                manager.shutdown().await;
            }
        }
    }

    Ok(())
}
