use std::collections::HashSet;
use std::env;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use workplace_backend::{
    auth::password::{generate_password, hash_password},
    config::AppConfig,
    db,
    models::{NewCompany, NewUser},
    schema::{companies, documents, users},
    storage::{FileStorage, LocalFileStorage},
    types::Role,
};

const USAGE: &str = "Usage: maintenance <command>\n\
    \n\
    Commands:\n  \
      create-admin <company> <address> <email> <first-name> <last-name>\n  \
      purge-reset-tokens\n  \
      prune-orphan-files [--dry-run]";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-admin") => create_admin(&args[1..])?,
        Some("purge-reset-tokens") => purge_reset_tokens()?,
        Some("prune-orphan-files") => {
            let dry_run = args.iter().any(|arg| arg == "--dry-run");
            prune_orphan_files(dry_run).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<(AppConfig, db::PgPool)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    Ok((config, pool))
}

/// Bootstraps a tenant: a company and its first Admin with a generated password.
fn create_admin(args: &[String]) -> Result<()> {
    let [company, address, email, first_name, last_name] = args else {
        bail!("create-admin expects 5 arguments\n{USAGE}");
    };
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        bail!("'{email}' is not a valid email address");
    }

    let (_, pool) = connect()?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let password = generate_password();
    let password_hash = hash_password(&password)?;

    let (company_id, user_id) = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            let taken: bool = diesel::select(diesel::dsl::exists(
                users::table.filter(users::email.eq(&email)),
            ))
            .get_result(conn)?;
            if taken {
                bail!("a user with email {email} already exists");
            }

            let company = NewCompany {
                id: Uuid::new_v4(),
                name: company.trim().to_owned(),
                address: address.trim().to_owned(),
            };
            diesel::insert_into(companies::table)
                .values(&company)
                .execute(conn)?;

            let user = NewUser {
                id: Uuid::new_v4(),
                first_name: first_name.trim().to_owned(),
                last_name: last_name.trim().to_owned(),
                email: email.clone(),
                password_hash,
                role: Role::Admin.as_str().to_owned(),
                company_id: company.id,
            };
            diesel::insert_into(users::table).values(&user).execute(conn)?;
            Ok((company.id, user.id))
        })
        .context("failed to create admin account")?;

    println!("Company {company_id} created.");
    println!("Admin {email} ({user_id}) created with password: {password}");
    Ok(())
}

fn purge_reset_tokens() -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let cleared = diesel::update(
        users::table.filter(users::password_reset_expires_at.lt(Utc::now())),
    )
    .set((
        users::password_reset_token_hash.eq::<Option<String>>(None),
        users::password_reset_expires_at.eq::<Option<chrono::DateTime<Utc>>>(None),
    ))
    .execute(&mut conn)
    .context("failed to clear expired reset tokens")?;

    println!("Cleared {cleared} expired password reset tokens.");
    Ok(())
}

/// Deletes stored files that no document row points at.
async fn prune_orphan_files(dry_run: bool) -> Result<()> {
    let (config, pool) = connect()?;
    let storage = LocalFileStorage::new(config.upload_dir.clone()).await?;

    let referenced: HashSet<String> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        documents::table
            .select(documents::file_path)
            .load::<String>(&mut conn)
            .context("failed to load document paths")?
            .into_iter()
            .collect()
    };

    let orphans: Vec<String> = storage
        .list_keys()
        .await?
        .into_iter()
        .filter(|key| !referenced.contains(key))
        .collect();

    if orphans.is_empty() {
        println!("No orphan files found.");
        return Ok(());
    }

    println!("Found {} orphan files.", orphans.len());
    if dry_run {
        for key in &orphans {
            println!("  {key}");
        }
        return Ok(());
    }

    for key in &orphans {
        if let Err(err) = storage.delete_object(key).await {
            eprintln!("Failed to delete {key}: {err}");
        }
    }
    println!("Orphan files deleted.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
