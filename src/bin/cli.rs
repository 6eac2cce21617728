use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use orgdesk::events::verify_chain;
use orgdesk::models::organization::OrganizationCreateRequest;
use orgdesk::routes::orgs::create_org_with_admin;
use orgdesk::utils::normalize_email;

#[derive(Parser, Debug)]
#[command(author, version, about = "orgdesk operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create an organization with an existing user as its first ADMIN
    BootstrapOrg {
        #[arg(long)]
        name: String,
        #[arg(long)]
        admin_email: String,
        /// Defaults to the display name
        #[arg(long)]
        legal_name: Option<String>,
        #[arg(long, default_value = "US")]
        country: String,
        #[arg(long, default_value = "unknown")]
        address: String,
        /// Defaults to the admin's email
        #[arg(long)]
        contact_email: Option<String>,
        #[arg(long, default_value = "unknown")]
        contact_phone: String,
    },
    /// Recompute an organization's audit hash chain
    AuditVerify {
        #[arg(long)]
        org_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // fall back to the crate-local `.env` when run from another directory
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::BootstrapOrg {
            name,
            admin_email,
            legal_name,
            country,
            address,
            contact_email,
            contact_phone,
        } => {
            let pool = get_pool().await?;
            let email = normalize_email(&admin_email);
            let admin_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&pool)
                .await?
                .with_context(|| format!("no user registered with email {email}"))?;

            let payload = OrganizationCreateRequest {
                legal_name: legal_name.unwrap_or_else(|| name.clone()),
                name,
                country,
                address,
                contact_email: contact_email.unwrap_or_else(|| email.clone()),
                contact_phone,
            };
            let org = create_org_with_admin(&pool, admin_id, payload)
                .await
                .context("failed to create organization")?;
            println!("Created organization {} ({}) with admin {}", org.name, org.id, email);
        }
        Commands::AuditVerify { org_id } => {
            let pool = get_pool().await?;
            let status = verify_chain(&pool, org_id).await?;
            match status.broken_at {
                None => println!("audit chain intact: {} entries", status.entries),
                Some(seq) => anyhow::bail!("audit chain broken at seq {seq} of {} entries", status.entries),
            }
        }
    }

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{}_{}.sql", timestamp, sanitize_name(name));
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;

    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, else the crate's own folder
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
