//! Seeds an organization, an owner membership and an ingestion API key.
//!
//! Prompts for the organization details, writes a `JWT_SECRET` to `.env` if
//! none is set, then prints the raw API key and a dashboard token. The raw key
//! is shown once; only its hash is stored.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::Rng;

use analytics_api::auth::api_key::{generate_api_key, hash_api_key, to_hex};
use analytics_api::auth::tokens::{issue_token, TOKEN_TTL_SECS};
use analytics_api::db::schema::{api_keys, memberships, organizations};
use analytics_api::models::api_key::NewApiKey;
use analytics_api::models::membership::NewMembership;
use analytics_api::models::organization::Organization;
use nexora_common::id::{prefix, prefixed_ulid};

fn prompt(label: &str, default: Option<&str>) -> String {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush().expect("failed to flush stdout");
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .expect("failed to read input");
    let input = input.trim().to_string();
    if input.is_empty() {
        default.unwrap_or("").to_string()
    } else {
        input
    }
}

fn read_env_file(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    map
}

fn append_env_var(path: &Path, key: &str, value: &str) {
    let mut content = std::fs::read_to_string(path).unwrap_or_default();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&format!("{key}={value}\n"));
    std::fs::write(path, content).expect("Failed to write .env file");
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn main() {
    println!("=== Nexora Analytics Setup ===\n");

    let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let env_path = env_path.as_path();
    let env_vars = read_env_file(env_path);

    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| env_vars.get("DATABASE_URL").cloned())
        .expect("DATABASE_URL must be set in the environment or .env");

    let jwt_secret = match std::env::var("JWT_SECRET")
        .ok()
        .or_else(|| env_vars.get("JWT_SECRET").cloned())
    {
        Some(secret) => secret,
        None => {
            let bytes: [u8; 32] = rand::thread_rng().gen();
            let secret = to_hex(&bytes);
            append_env_var(env_path, "JWT_SECRET", &secret);
            println!("Generated JWT_SECRET and wrote it to .env");
            secret
        }
    };

    let org_name = prompt("Organization name", Some("Demo"));
    let default_slug = slugify(&org_name);
    let slug = prompt("Organization slug", Some(&default_slug));
    let default_user = prefixed_ulid(prefix::USER);
    let user_id = prompt("Owner user id", Some(&default_user));
    let key_name = prompt("API key name", Some("Default"));

    println!("\nConnecting to database...");
    let mut conn = PgConnection::establish(&database_url).expect("failed to connect to database");

    let now = Utc::now();
    let org = Organization {
        id: prefixed_ulid(prefix::ORGANIZATION),
        name: org_name,
        slug,
        created_at: now,
    };
    let raw_key = generate_api_key();
    let key_hash = hash_api_key(&raw_key);
    let key_id = prefixed_ulid(prefix::API_KEY);
    let membership_id = prefixed_ulid(prefix::MEMBERSHIP);

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(organizations::table)
            .values(&org)
            .execute(conn)?;
        diesel::insert_into(memberships::table)
            .values(NewMembership {
                id: &membership_id,
                org_id: &org.id,
                user_id: &user_id,
                role: "owner",
                created_at: now,
            })
            .execute(conn)?;
        diesel::insert_into(api_keys::table)
            .values(NewApiKey {
                id: &key_id,
                org_id: &org.id,
                name: &key_name,
                key_hash: &key_hash,
                is_active: true,
                created_at: now,
            })
            .execute(conn)?;
        Ok(())
    })
    .expect("failed to seed organization");

    let token =
        issue_token(&jwt_secret, &user_id, TOKEN_TTL_SECS).expect("failed to issue dashboard token");

    println!("\n=== Organization created! ===");
    println!("  ORG_ID:          {}", org.id);
    println!("  USER_ID:         {}", user_id);
    println!("  API_KEY:         {}", raw_key);
    println!("  DASHBOARD_TOKEN: {}", token);
    println!("\nThe API key is shown once. Store it now.");
}
