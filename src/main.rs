use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conductor_controller::{HttpActionController, RemoteRegistry};
use conductor_core::config::AppConfig;
use conductor_core::types::Intent;
use conductor_engine::{
    CapabilityRegistry, ConditionRegistry, Engine, KeywordClassifier, Pipeline, PipelineOutput,
    Planner, TemplateRegistry,
};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Plan and run multi-step desktop tasks on a remote listener"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read requests line by line and run each one
    Repl,
    /// Classify, plan and run a single request
    Run {
        /// The request text
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Plan and run a named intent, skipping classification
    Exec {
        /// Template or action name
        intent: String,
        /// Slot parameter as key=value (value parsed as JSON when possible)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Text exposed to the graph as `user_input`
        #[arg(long, default_value = "")]
        input: String,
        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Start the HTTP gateway
    Serve,
    /// List registered templates
    Templates,
    /// List actions advertised by the remote listener
    Actions,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conductor=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "conductor", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Templates) => {
            for template in TemplateRegistry::with_builtins().templates() {
                if template.params().is_empty() {
                    println!("{}", template.name());
                } else {
                    println!("{} ({})", template.name(), template.params().join(", "));
                }
            }
            return Ok(());
        }
        Some(Commands::Actions) => {
            let controller = HttpActionController::from_config(&config.controller).await?;
            let registry = controller
                .load_registry(config.controller.timeout())
                .await?;
            for action in &registry.actions {
                println!("{action}");
            }
            return Ok(());
        }
        _ => {}
    }

    let pipeline = build_pipeline(&config).await?;

    match cli.command {
        Some(Commands::Run { text }) => {
            let text = if text.is_empty() {
                // Read from stdin
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                text.join(" ")
            };
            let cancel = cancel_on_ctrl_c();
            let output = pipeline.run(text.trim(), &cancel).await?;
            print_output(&output)?;
            if !output.result.succeeded() {
                std::process::exit(1);
            }
        }
        Some(Commands::Exec {
            intent,
            params,
            input,
            dry_run,
        }) => {
            let intent = params
                .into_iter()
                .fold(Intent::new(intent), |intent, (k, v)| intent.with_param(k, v));
            if dry_run {
                let plan = pipeline
                    .planner()
                    .plan_intent(&intent, pipeline.available_actions())?;
                println!("{}", serde_json::to_string_pretty(&plan)?);
                return Ok(());
            }
            let cancel = cancel_on_ctrl_c();
            let output = pipeline.run_intent(intent, &input, &cancel).await?;
            print_output(&output)?;
            if !output.result.succeeded() {
                std::process::exit(1);
            }
        }
        Some(Commands::Serve) => {
            info!(bind = %config.gateway.bind, "Starting HTTP gateway");
            let server = conductor_gateway::GatewayServer::new(config.gateway.clone(), pipeline);
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Some(Commands::Repl) | None => run_repl(&pipeline).await?,
        Some(Commands::Config)
        | Some(Commands::Templates)
        | Some(Commands::Actions)
        | Some(Commands::Completions { .. }) => unreachable!("handled before pipeline setup"),
    }

    Ok(())
}

/// Wire registries, controller and engine from config.
///
/// Falls back to `controller.actions` when the remote registry cannot be loaded.
async fn build_pipeline(config: &AppConfig) -> anyhow::Result<Arc<Pipeline>> {
    let controller = HttpActionController::from_config(&config.controller).await?;
    let remote = match controller.load_registry(config.controller.timeout()).await {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "Remote registry unavailable, using configured actions");
            RemoteRegistry {
                actions: config.controller.actions.iter().cloned().collect(),
                file_registry: HashMap::new(),
            }
        }
    };

    let mut file_registry = remote.file_registry;
    file_registry.extend(config.file_registry.clone());

    let classifier = KeywordClassifier::new().with_file_registry(file_registry.clone());
    let capabilities = Arc::new(CapabilityRegistry::with_builtins(file_registry));
    let conditions = ConditionRegistry::with_builtins().with_constants(&config.conditions);

    let planner = Planner::new(
        Arc::new(TemplateRegistry::with_builtins()),
        capabilities.clone(),
        Arc::new(classifier),
        config.planner.confidence_threshold,
    );
    let engine = Engine::new(
        Arc::new(controller),
        Arc::new(conditions),
        capabilities,
        config.engine.clone(),
        config.controller.timeout(),
    );

    info!(
        actions = remote.actions.len(),
        templates = planner.templates().len(),
        "Pipeline ready"
    );
    Ok(Arc::new(Pipeline::new(
        Arc::new(planner),
        Arc::new(engine),
        remote.actions,
    )))
}

/// A token that is cancelled when the user presses Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Cancelling run...");
        cancel_clone.cancel();
    });
    cancel
}

fn print_output(output: &PipelineOutput) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

async fn run_repl(pipeline: &Pipeline) -> anyhow::Result<()> {
    println!("Conductor v{}", env!("CARGO_PKG_VERSION"));
    println!("Type a request, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!(">>> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit" | "/q") {
            break;
        }

        let cancel = CancellationToken::new();
        let run = pipeline.run(input, &cancel);
        tokio::pin!(run);
        let output = tokio::select! {
            output = &mut run => output,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                run.await
            }
        };

        match output {
            Ok(output) if output.result.succeeded() => {
                println!("[ok] {} ({} steps)", output.plan.id(), output.result.executed_nodes.len());
            }
            Ok(output) => println!(
                "[failed] {} at {}: {}",
                output.plan.id(),
                output.result.failed_node.as_deref().unwrap_or("-"),
                output.result.error.as_deref().unwrap_or("unknown error")
            ),
            Err(e) => println!("[error] {e}"),
        }
    }
    Ok(())
}
