//! API token management commands.

use crate::cli::TokenCommand;
use crate::config::Config;
use crate::models::TokenRecord;
use crate::paths::Paths;
use crate::server::open_token_store;
use crate::services::token_store::parse_token_ttl;
use anyhow::Result;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn run(command: TokenCommand, config: &Config, paths: &Paths) -> Result<()> {
    let store = open_token_store(config, paths)?;

    match command {
        TokenCommand::Create {
            name,
            size,
            expires_in,
        } => {
            let ttl = parse_token_ttl(&expires_in)?;
            let (token, record) = store.create(&name, size, ttl)?;
            println!("Token '{}' created. Store it now; it will not be shown again:", record.name);
            println!("{}", token);
            println!("Expires: {}", expiry(&record));
        }
        TokenCommand::List => {
            let records = store.list();
            if records.is_empty() {
                println!("No tokens");
            }
            for record in records {
                println!(
                    "{}\t{}\tCreated: {}\tExpires: {}",
                    record.name,
                    if record.active { "Active" } else { "Revoked" },
                    record.created_at.format(DATE_FORMAT),
                    expiry(&record),
                );
            }
        }
        TokenCommand::Revoke { name } => {
            if store.revoke(&name)? {
                println!("Token '{}' revoked", name);
            } else {
                anyhow::bail!("No token named '{}'", name);
            }
        }
        TokenCommand::Delete { name } => {
            if store.delete(&name)? {
                println!("Token '{}' deleted", name);
            } else {
                anyhow::bail!("No token named '{}'", name);
            }
        }
        TokenCommand::Purge => {
            let report = store.purge()?;
            println!(
                "Revoked {} expired token(s), removed {} inactive token(s)",
                report.expired, report.removed
            );
        }
    }

    Ok(())
}

fn expiry(record: &TokenRecord) -> String {
    match record.expires_at {
        Some(expires) => expires.format(DATE_FORMAT).to_string(),
        None => "Never".to_string(),
    }
}
