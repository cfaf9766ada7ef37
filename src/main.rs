use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use opsflow::config::Config;
use opsflow::core::{AutonomyLevel, Priority, TaskStatus, TaskType};
use opsflow::lifecycle::{ManagerConfig, TaskManager};
use opsflow::orchestration::{
    LocalProcessExecutor, LogNotifier, Planner, TemplatePlanner,
};
use opsflow::{olog, Error, Result};

/// Opsflow - task lifecycle manager for IT administration automation
#[derive(Parser, Debug)]
#[command(name = "opsflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    OPSFLOW_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.opsflow/opsflow.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Task commands for the opsflow lifecycle manager
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Submit a task and drive it to completion in-process
    Run {
        /// Task type: server_configure, system_diagnose, system_maintenance, server_provision
        task_type: String,

        /// Human-readable description of the task
        description: String,

        /// Task parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Priority: low, medium, high
        #[arg(long, default_value = "medium")]
        priority: String,

        /// Autonomy level: guided, supervised, semi_autonomous, fully_autonomous
        #[arg(long, default_value = "supervised")]
        autonomy: String,

        /// Approve the plan without prompting
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Plan a task and print the proposed steps without executing
    Plan {
        /// Task type: server_configure, system_diagnose, system_maintenance, server_provision
        task_type: String,

        /// Human-readable description of the task
        description: String,

        /// Task parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    opsflow::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            task_type,
            description,
            params,
            priority,
            autonomy,
            yes,
        } => run_task(&task_type, &description, &params, &priority, &autonomy, yes).await,
        Command::Plan {
            task_type,
            description,
            params,
        } => plan_task(&task_type, &description, &params).await,
    }
}

/// Parse repeated `key=value` arguments into task parameters.
///
/// Values that parse as JSON (numbers, booleans, quoted strings) keep
/// their type; everything else becomes a plain string.
fn parse_parameters(params: &[String]) -> Result<HashMap<String, serde_json::Value>> {
    let mut parsed = HashMap::new();
    for param in params {
        let (key, value) = param.split_once('=').ok_or_else(|| {
            Error::Validation(format!("parameter '{}' is not in key=value form", param))
        })?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

async fn run_task(
    task_type: &str,
    description: &str,
    params: &[String],
    priority: &str,
    autonomy: &str,
    yes: bool,
) -> Result<()> {
    let task_type: TaskType = task_type.parse()?;
    let priority: Priority = priority.parse()?;
    let autonomy: AutonomyLevel = autonomy.parse()?;
    let parameters = parse_parameters(params)?;

    let config = Config::load()?;
    let manager = TaskManager::new(
        Arc::new(TemplatePlanner::new()),
        Arc::new(LocalProcessExecutor::new()),
        Arc::new(LogNotifier::new(
            config.primary_contact.clone(),
            config.escalation_contact.clone(),
        )),
        ManagerConfig::from(&config),
    );

    let id = manager
        .create(task_type, description, parameters, priority, autonomy)
        .await?;
    olog!("cli submitted task {}", id.short());

    let snapshot = manager.get(&id).await?;
    match snapshot.status {
        TaskStatus::AwaitingApproval => {
            println!(
                "Plan for task {} ({}):",
                id.short(),
                snapshot.plan_summary.as_deref().unwrap_or(description)
            );
            for (i, step) in snapshot.steps.iter().enumerate() {
                println!(
                    "  {}. [{} risk] {}",
                    i + 1,
                    step.risk_level,
                    step.description
                );
            }

            if yes || prompt_approval()? {
                manager.approve(&id).await?;
            } else {
                manager.reject(&id).await?;
                println!("Task rejected.");
                let task = manager.get(&id).await?;
                println!("{}", serde_json::to_string_pretty(&task)?);
                return Ok(());
            }
        }
        TaskStatus::Failed => {
            let task = manager.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            return Ok(());
        }
        _ => {}
    }

    let task = manager.wait(&id).await?;
    println!("{}", serde_json::to_string_pretty(&task)?);

    if task.status == TaskStatus::Failed {
        return Err(Error::Execution(
            task.error.unwrap_or_else(|| "task failed".to_string()),
        ));
    }
    Ok(())
}

async fn plan_task(task_type: &str, description: &str, params: &[String]) -> Result<()> {
    let task_type: TaskType = task_type.parse()?;
    let parameters = parse_parameters(params)?;
    let config = Config::load()?;

    let task = opsflow::core::Task::new(
        task_type,
        description,
        parameters,
        Priority::Medium,
        AutonomyLevel::Supervised,
    );

    let planner = TemplatePlanner::new();
    let proposal = planner.plan(&task).await?;
    let summary = proposal.summary.clone();
    let steps = proposal.into_steps(config.max_steps)?;

    println!("{}", summary);
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(())
}

/// Ask the operator whether to approve the printed plan.
fn prompt_approval() -> Result<bool> {
    print!("Approve this plan? [y/N] ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
