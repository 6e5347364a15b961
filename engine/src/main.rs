// Archon agent execution engine
// Main entry point for the archon binary

use archon_engine::api::{self, AppState};
use archon_engine::bootstrap::build_services;
use archon_engine::cli::{Cli, Command};
use archon_engine::config::Config;
use archon_engine::orchestrator::CycleRequest;
use archon_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Basic telemetry before the config is loaded
    init_telemetry();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize with the config-driven level unless RUST_LOG is set
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!("archon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => {
            let services = build_services(&config).await?;
            let cron_loop = std::sync::Arc::clone(&services.cron).start();

            let state = AppState {
                orchestrator: services.orchestrator,
                lifecycle: services.lifecycle,
                router: services.router,
                skills: services.skills,
                memory: services.memory,
                goals: services.goals,
                cron: std::sync::Arc::clone(&services.cron),
                api_key: Some(config.api.api_key.clone()).filter(|k| !k.is_empty()),
            };

            api::serve(state, &config.api.bind).await?;

            services.cron.shutdown();
            cron_loop.await.ok();
            services.db.close().await?;
            Ok(())
        }

        Command::Run {
            command,
            skill,
            task_type,
            budget,
        } => {
            let services = build_services(&config).await?;

            let mut request = CycleRequest::new(command);
            request.skill_hint = skill;
            request.task_type = task_type;
            request.budget = budget;

            let result = services.orchestrator.run(request).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "task {} {} in {:.2}s (skill: {}, model: {}, tokens: {})",
                    result.task_id.unwrap_or_default(),
                    if result.success { "closed" } else { "failed" },
                    result.elapsed_s,
                    result.skill_used.as_deref().unwrap_or("-"),
                    result.model_used.as_deref().unwrap_or("-"),
                    result.tokens_used,
                );
                if let Some(error) = &result.error {
                    println!("error: {error}");
                }
                println!("{}", serde_json::to_string_pretty(&result.output)?);
            }

            services.db.close().await?;
            Ok(())
        }

        Command::Tasks { limit } => {
            let services = build_services(&config).await?;
            let tasks = services.lifecycle.tasks.list_recent(limit).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in tasks {
                    println!(
                        "#{:<5} {:<10} {:<12} {}",
                        task.id,
                        task.status.as_str(),
                        task.skill_name.as_deref().unwrap_or("-"),
                        task.title,
                    );
                }
            }

            services.db.close().await?;
            Ok(())
        }

        Command::Status => {
            let services = build_services(&config).await?;

            println!("governor mode: {}", config.governor.mode.as_str());
            println!("providers:");
            for provider in services.router.list_providers() {
                println!(
                    "  {:<12} {:<28} {}",
                    provider.provider,
                    provider.model,
                    if provider.available { "available" } else { "unavailable" },
                );
            }

            services.db.close().await?;
            Ok(())
        }
    }
}
