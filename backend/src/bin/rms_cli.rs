//! RMS operational command-line interface.
//!
//! Drives the scheduling core against the local repository: schedule
//! generation, compliance validation, swap requests, resilience analysis,
//! and run aborts.
//!
//! # Usage
//!
//! ```bash
//! rms-cli --demo generate-schedule --start 2026-03-09 --end 2026-03-13 --algorithm cp_sat
//! rms-cli --demo validate-schedule --start 2026-03-09 --end 2026-03-13
//! rms-cli --demo swap --source-person 1 --source-week 2026-03-09 --target-person 2
//! rms-cli abort-run --run-id <uuid> --reason "operator stop"
//! ```
//!
//! Exit codes: 0 success, 2 invalid input, 3 infeasible, 4 aborted,
//! 5 timeout, 10 internal error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;

use rms_rust::config::CoreConfig;
use rms_rust::db::services::load_context;
use rms_rust::db::{
    Clock, InMemoryBackupMarker, InMemoryKeyedStore, LogDispatcher, MutationCause,
    RepositoryFactory, ScheduleRepository, SharedClock, SharedRepository, SystemClock,
};
use rms_rust::engine::{Algorithm, SchedulingEngine, SolveConfig, SolveStatus};
use rms_rust::error::CoreError;
use rms_rust::models::{
    generate_blocks, ActivityType, Coverage, Eligibility, Person, RotationTemplate, SwapType,
};
use rms_rust::resilience::ResilienceAnalyzer;
use rms_rust::swap::{SwapEngine, SwapSpec};
use rms_rust::validator::ComplianceValidator;

#[derive(Parser, Debug)]
#[command(name = "rms-cli", version, about = "Residency scheduling core CLI")]
struct Cli {
    /// Path to the core configuration file.
    #[arg(long, default_value = "config/rms.toml")]
    config: PathBuf,

    /// Seed a demonstration roster before running the command.
    #[arg(long, default_value_t = false)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a schedule for a date range.
    GenerateSchedule {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "cp_sat")]
        algorithm: String,
        #[arg(long, default_value_t = 120)]
        timeout_seconds: u64,
        /// Optional idempotency key; retries with the same key replay the
        /// stored response.
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Validate the stored schedule for a date range.
    ValidateSchedule {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },

    /// Request and validate a swap between two people.
    Swap {
        #[arg(long)]
        source_person: i64,
        #[arg(long)]
        source_week: String,
        #[arg(long)]
        target_person: i64,
        #[arg(long)]
        target_week: Option<String>,
        #[arg(long = "type", default_value = "one_to_one")]
        swap_type: String,
    },

    /// Analyze schedule resilience for a date range.
    AnalyzeResilience {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },

    /// Request an abort for a running solve.
    AbortRun {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        reason: String,
    },
}

fn parse_date(raw: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| CoreError::InputError(format!("invalid date: {} (expected YYYY-MM-DD)", raw)))
}

/// Seed a small realistic roster: trainees across PGY levels, two faculty,
/// and the standard template set.
async fn seed_demo(
    repo: &SharedRepository,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), CoreError> {
    let mut people = vec![
        Person::trainee(1, "Adams", 1),
        Person::trainee(2, "Baker", 2),
        Person::trainee(3, "Chen", 2),
        Person::trainee(4, "Diaz", 3),
        Person::faculty(10, "Dr. Eads"),
        Person::faculty(11, "Dr. Flores"),
    ];
    people[3].backup_pool = true;
    repo.store_people(&people).await?;

    let rotations = vec![
        RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
            .with_coverage(Coverage::range(1, 1, 2))
            .with_eligibility(Eligibility::trainees_only())
            .with_hours(5.0),
        RotationTemplate::new(2, "FMIT", ActivityType::Inpatient)
            .with_eligibility(Eligibility::faculty_only()),
        RotationTemplate::new(3, "ELECTIVE", ActivityType::Elective)
            .with_eligibility(Eligibility::trainees_only()),
    ];
    repo.store_rotations(&rotations).await?;
    repo.store_blocks(&generate_blocks(start, end, 1)).await?;
    info!("seeded demo roster: {} people, {} rotations", 6, 3);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = if cli.config.exists() {
        CoreConfig::from_file(&cli.config)
            .map_err(CoreError::InputError)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        CoreConfig::default()
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let repo = RepositoryFactory::create_local(clock.clone());
    let store = Arc::new(InMemoryKeyedStore::new(clock.clone()));
    let backup = Arc::new(InMemoryBackupMarker::fresh(clock.clone()));
    let engine = SchedulingEngine::new(
        repo.clone(),
        store.clone(),
        backup,
        clock.clone(),
        config.clone(),
    );

    match cli.command {
        Command::GenerateSchedule {
            start,
            end,
            algorithm,
            timeout_seconds,
            idempotency_key,
        } => {
            let start = parse_date(&start)?;
            let end = parse_date(&end)?;
            let algorithm: Algorithm = algorithm.parse().map_err(CoreError::InputError)?;
            if cli.demo {
                seed_demo(&repo, start, end).await?;
            }
            let (ctx, validation) = load_context(&repo, start, end).await?;
            if !validation.is_valid() {
                return Err(CoreError::InvariantViolation(format!(
                    "context has {} invariant errors",
                    validation.errors.len()
                ))
                .into());
            }
            let solve_config = SolveConfig {
                algorithm,
                timeout_seconds,
                ..SolveConfig::default()
            };
            let result = engine
                .generate(&ctx, &solve_config, idempotency_key.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            match result.status {
                SolveStatus::Optimal | SolveStatus::Feasible => Ok(()),
                SolveStatus::Infeasible | SolveStatus::InfeasibleNoTemplates => {
                    Err(CoreError::Infeasible(
                        "no hard-constraint-satisfying schedule".to_string(),
                    )
                    .into())
                }
                SolveStatus::Aborted => Err(CoreError::Aborted("run aborted".to_string()).into()),
                SolveStatus::Timeout => Err(CoreError::Timeout("run timed out".to_string()).into()),
                SolveStatus::InternalError => {
                    Err(CoreError::internal("solver fault", result.run_id).into())
                }
            }
        }

        Command::ValidateSchedule { start, end } => {
            let start = parse_date(&start)?;
            let end = parse_date(&end)?;
            if cli.demo {
                seed_demo(&repo, start, end).await?;
            }
            let (ctx, _) = load_context(&repo, start, end).await?;
            let report = ComplianceValidator::new(&config).validate(&ctx);
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            Ok(())
        }

        Command::Swap {
            source_person,
            source_week,
            target_person,
            target_week,
            swap_type,
        } => {
            let source_week = parse_date(&source_week)?;
            let target_week = target_week.as_deref().map(parse_date).transpose()?;
            let swap_type = match swap_type.to_ascii_lowercase().as_str() {
                "one_to_one" => SwapType::OneToOne,
                "absorb" => SwapType::Absorb,
                "chain" => SwapType::Chain,
                other => {
                    return Err(
                        CoreError::InputError(format!("unknown swap type: {}", other)).into()
                    )
                }
            };
            let week_end = source_week + chrono::Duration::days(27);
            if cli.demo {
                seed_demo(&repo, source_week, week_end).await?;
                // Give both parties something to trade.
                let blocks = repo.list_blocks(source_week, week_end).await?;
                let now = clock.now();
                let seeds = vec![
                    rms_rust::models::Assignment::new(0, source_person, blocks[0].id, 1, now, "demo"),
                    rms_rust::models::Assignment::new(0, target_person, blocks[3].id, 1, now, "demo"),
                ];
                repo.insert_assignments(&seeds, MutationCause::Manual("demo-seed".into()), "demo")
                    .await?;
            }
            let (ctx, _) = load_context(&repo, source_week, week_end).await?;

            let swap_engine = SwapEngine::new(
                repo.clone(),
                clock.clone(),
                Arc::new(LogDispatcher),
                config.clone(),
            );
            let record = swap_engine
                .request_swap(
                    SwapSpec {
                        source_person: source_person.into(),
                        source_week,
                        target_person: target_person.into(),
                        target_week: target_week.or(Some(source_week)),
                        swap_type,
                        reason: "cli request".to_string(),
                        requested_by: "cli".to_string(),
                    },
                    None,
                )
                .await?;
            let (ok, violations) = swap_engine.validate_swap(&ctx, record.id).await?;
            let updated = repo.get_swap(record.id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "record": updated,
                    "valid": ok,
                    "violations": violations,
                }))
                .unwrap_or_default()
            );
            if ok {
                Ok(())
            } else {
                Err(CoreError::Infeasible("swap does not validate".to_string()).into())
            }
        }

        Command::AnalyzeResilience { start, end } => {
            let start = parse_date(&start)?;
            let end = parse_date(&end)?;
            if cli.demo {
                seed_demo(&repo, start, end).await?;
            }
            let (ctx, _) = load_context(&repo, start, end).await?;
            let analyzer = ResilienceAnalyzer::new(config, clock);
            let report = analyzer.analyze(&ctx);
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            Ok(())
        }

        Command::AbortRun { run_id, reason } => {
            let accepted = engine.abort_run(&run_id, &reason, "cli").await;
            println!(
                "{}",
                serde_json::json!({ "run_id": run_id, "abort_accepted": accepted })
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (kind, code) = err
                .downcast_ref::<CoreError>()
                .map(|core| (core.kind(), core.exit_code()))
                .unwrap_or(("INTERNAL_ERROR", 10));
            eprintln!("error [{}]: {:#}", kind, err);
            ExitCode::from(code as u8)
        }
    }
}
