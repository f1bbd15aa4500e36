use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod average;
mod db;
mod models;
mod report;
mod statistics;

use db::ScopeSelection;

#[derive(Parser)]
#[command(name = "gradebook")]
#[command(about = "Grade averages and scope statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Weighted overall average for a student, or one subject's average
    Average {
        #[arg(long)]
        email: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Academic summary for a student
    Summary {
        #[arg(long)]
        email: String,
        #[arg(long)]
        json: bool,
    },
    /// Print statistics for a scope
    Stats {
        #[arg(long)]
        json: bool,
        #[command(subcommand)]
        scope: ScopeCommand,
    },
    /// Generate a markdown statistics report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(subcommand)]
        scope: ScopeCommand,
    },
    /// Export the grades of a scope as CSV
    Export {
        #[arg(long, default_value = "grades.csv")]
        out: PathBuf,
        #[command(subcommand)]
        scope: ScopeCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum ScopeCommand {
    /// One student, optionally within one semester
    Student {
        #[arg(long)]
        email: String,
        #[arg(long)]
        semester: Option<String>,
    },
    /// One subject, optionally within one semester
    Subject {
        #[arg(long)]
        name: String,
        #[arg(long)]
        semester: Option<String>,
    },
    /// One class section
    Class {
        #[arg(long)]
        name: String,
    },
    /// Every grade in one semester
    Semester {
        #[arg(long)]
        name: String,
    },
    /// Every grade in the system
    Overall,
}

impl ScopeCommand {
    fn selection(&self) -> ScopeSelection<'_> {
        match self {
            ScopeCommand::Student { email, semester } => ScopeSelection::Student {
                email,
                semester: semester.as_deref(),
            },
            ScopeCommand::Subject { name, semester } => ScopeSelection::Subject {
                name,
                semester: semester.as_deref(),
            },
            ScopeCommand::Class { name } => ScopeSelection::Class { name },
            ScopeCommand::Semester { name } => ScopeSelection::Semester { name },
            ScopeCommand::Overall => ScopeSelection::Overall,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} grades from {}.", csv.display());
        }
        Commands::Average { email, subject } => {
            let student = db::find_student(&pool, &email).await?;
            let records = db::fetch_grades(
                &pool,
                &db::GradeFilter {
                    student_id: Some(student.id),
                    ..db::GradeFilter::default()
                },
            )
            .await?;

            match subject {
                Some(name) => {
                    let subject = db::find_subject(&pool, &name).await?;
                    match average::subject_average(&records, subject.id) {
                        Some(value) => println!(
                            "{} average in {} (coefficient {}): {:.2}",
                            student.full_name,
                            subject.name,
                            subject
                                .coefficient
                                .map(|c| c.to_string())
                                .unwrap_or_else(|| "unset".to_string()),
                            value
                        ),
                        None => {
                            println!("No grades for {} in {}.", student.full_name, subject.name)
                        }
                    }
                }
                None => {
                    println!(
                        "{} overall average: {}",
                        student.full_name,
                        average::overall_average(&records)
                    );
                    for (subject, value) in average::all_subject_averages(&records) {
                        println!("- {subject}: {value:.2}");
                    }
                }
            }
        }
        Commands::Summary { email, json } => {
            let student = db::find_student(&pool, &email).await?;
            let classes = db::enrolled_class_names(&pool, student.id).await?;
            let records = db::fetch_grades(
                &pool,
                &db::GradeFilter {
                    student_id: Some(student.id),
                    ..db::GradeFilter::default()
                },
            )
            .await?;
            let summary = report::build_student_summary(&student, classes, &records);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", report::render_student_summary(&summary));
            }
        }
        Commands::Stats { json, scope } => {
            let (scope, records) = db::load_scope(&pool, scope.selection()).await?;
            let stats = statistics::aggregate(&records, &scope);

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", report::build_report(&stats));
            }
        }
        Commands::Report { out, scope } => {
            let (scope, records) = db::load_scope(&pool, scope.selection()).await?;
            let stats = statistics::aggregate(&records, &scope);
            std::fs::write(&out, report::build_report(&stats))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { out, scope } => {
            let (_, records) = db::load_scope(&pool, scope.selection()).await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_grades_csv(file, &records)?;
            println!("Exported {} grades to {}.", records.len(), out.display());
        }
    }

    Ok(())
}
