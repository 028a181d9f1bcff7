use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use field_users::authz::RoleKind;
use field_users::notify::{self, events, Dispatch, LogTransport, TemplateStore};
use field_users::utils::{hash_password, normalize_email, timestamp, utc_now};

#[derive(Parser, Debug)]
#[command(author, version, about = "field-users admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create an active superuser account
    CreateSuperuser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// Grant a permission codename (e.g. `user.view_budget`) directly to an actor
    Grant {
        #[arg(long)]
        email: String,
        #[arg(long)]
        codename: String,
    },
    /// Reload email and push templates from `<dir>/{email,push}/<lang>/<event>/`
    ResetTemplates {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Deliver a push event to one actor right away, recording the notification
    SendPush {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = events::MISSION_ASSIGNED)]
        event: String,
        #[arg(long, default_value = "ru")]
        lang: String,
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long, default_value = "")]
        datetime: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fall back to the crate-local `.env` when run from another directory.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let pool = field_users::db::connect().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::CreateSuperuser {
            email,
            password,
            first_name,
            last_name,
        } => {
            let id = create_superuser(&pool, &email, &password, &first_name, &last_name).await?;
            println!("Superuser created: {}", id);
        }
        Commands::Grant { email, codename } => {
            let id = actor_id_by_email(&pool, &email).await?;
            validate_codename(&codename)?;
            sqlx::query("INSERT OR IGNORE INTO actor_permissions (actor_id, codename) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(&codename)
                .execute(&pool)
                .await?;
            println!("Granted {} to {}", codename, email);
        }
        Commands::ResetTemplates { dir } => {
            let loaded = TemplateStore::new(pool.clone())
                .reset_from_dir(&dir)
                .await?;
            println!("Loaded {} templates from {}", loaded, dir.display());
        }
        Commands::SendPush {
            email,
            event,
            lang,
            url,
            datetime,
        } => {
            let id = actor_id_by_email(&pool, &email).await?;
            let dispatch = Dispatch::push(
                id,
                &event,
                &lang,
                field_users::context! { "url" => url, "datetime" => datetime },
            );
            let outcome = notify::deliver(&pool, &TemplateStore::new(pool.clone()), &LogTransport, &dispatch).await?;
            println!("Push {}: {:?}", event, outcome);
        }
    }

    Ok(())
}

async fn create_superuser(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<Uuid> {
    let email = normalize_email(email);
    let password_hash = hash_password(password)?;
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO actors (id, email, first_name, last_name, role, is_active, password_hash, date_joined) \
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&email)
    .bind(first_name)
    .bind(last_name)
    .bind(RoleKind::SuperUser.as_str())
    .bind(password_hash)
    .bind(timestamp(utc_now()))
    .execute(pool)
    .await
    .with_context(|| format!("failed to create superuser {}", email))?;

    Ok(id)
}

async fn actor_id_by_email(pool: &SqlitePool, email: &str) -> anyhow::Result<Uuid> {
    let id: String = sqlx::query_scalar("SELECT id FROM actors WHERE email = ?")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no actor with email {}", email))?;
    Ok(Uuid::parse_str(&id)?)
}

/// Codenames look like `<app>.<verb>_<model>`.
fn validate_codename(codename: &str) -> anyhow::Result<()> {
    let valid = codename
        .split_once('.')
        .map(|(app, perm)| !app.is_empty() && perm.split_once('_').is_some_and(|(v, m)| !v.is_empty() && !m.is_empty()))
        .unwrap_or(false);
    if !valid {
        anyhow::bail!("codename must look like <app>.<verb>_<model>, got {}", codename);
    }
    Ok(())
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let has_table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if has_table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .context("failed to load migrations")
}
