use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, ClientServices, PhotoUpload};
use shared::{
    domain::{LogId, PatientId, PhotoId, SessionId, StudentId},
    protocol::NewPatientLog,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides `api_base_url` from client.toml / APP__API_BASE_URL.
    #[arg(long)]
    api_base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show attending and non-attending students for a session.
    Attendance {
        #[arg(long)]
        session: i64,
    },
    MarkPresent {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        student: i64,
    },
    MarkAbsent {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        student: i64,
    },
    Logs {
        #[arg(long)]
        patient: String,
    },
    CreateLog {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        notes: Option<String>,
    },
    DeleteLog {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        log: String,
    },
    /// Upload photos to a log, in the order given.
    UploadPhotos {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        log: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    DeletePhoto {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        log: String,
        #[arg(long)]
        photo: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings()?;
    if let Some(url) = cli.api_base_url {
        settings = settings.with_api_base_url(&url)?;
    }
    tracing::info!("desktop: using api base url {}", settings.api_base_url);
    let services = ClientServices::from_settings(&settings)?;

    match cli.command {
        Command::Attendance { session } => {
            let session = SessionId(session);
            services
                .attendance
                .fetch_attendances_by_session(session)
                .await?;
            services
                .attendance
                .fetch_non_attending_students(session)
                .await?;
            print_attendance(&services).await?;
        }
        Command::MarkPresent { session, student } => {
            let session = SessionId(session);
            services
                .attendance
                .fetch_non_attending_students(session)
                .await?;
            services
                .attendance
                .add_attendance(session, StudentId(student))
                .await?;
            print_attendance(&services).await?;
        }
        Command::MarkAbsent { session, student } => {
            let session = SessionId(session);
            services
                .attendance
                .fetch_attendances_by_session(session)
                .await?;
            services
                .attendance
                .delete_attendance(session, StudentId(student))
                .await?;
            print_attendance(&services).await?;
        }
        Command::Logs { patient } => {
            services.logs.load_logs(&PatientId(patient)).await?;
            print_logs(&services).await?;
        }
        Command::CreateLog {
            patient,
            title,
            notes,
        } => {
            let created = services
                .logs
                .create_log(&PatientId(patient), &NewPatientLog { title, notes })
                .await?;
            println!("created log {}", created.id);
        }
        Command::DeleteLog { patient, log } => {
            services
                .logs
                .delete_log(&PatientId(patient), &LogId(log))
                .await?;
            println!("deleted");
        }
        Command::UploadPhotos {
            patient,
            log,
            files,
        } => {
            let patient = PatientId(patient);
            let log = LogId(log);
            services.logs.get_log_by_id(&patient, &log).await?;

            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                uploads.push(
                    PhotoUpload::from_path(path)
                        .await
                        .with_context(|| format!("failed to read '{}'", path.display()))?,
                );
            }
            let photos = services.uploads.upload_all(uploads, &patient, &log).await?;
            println!("attached {} photo(s) to log {log}", photos.len());
            print_logs(&services).await?;
        }
        Command::DeletePhoto {
            patient,
            log,
            photo,
        } => {
            services
                .logs
                .delete_photo_from_log(&PatientId(patient), &LogId(log), &PhotoId(photo))
                .await?;
            println!("deleted");
        }
    }

    Ok(())
}

async fn print_attendance(services: &ClientServices) -> Result<()> {
    let state = services.attendance.snapshot().await;
    println!(
        "attending: {}",
        serde_json::to_string_pretty(&state.attendances)?
    );
    println!(
        "not attending: {}",
        serde_json::to_string_pretty(&state.non_attending_students)?
    );
    Ok(())
}

async fn print_logs(services: &ClientServices) -> Result<()> {
    let state = services.logs.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&state.logs)?);
    Ok(())
}
