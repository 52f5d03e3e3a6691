// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use chrono::Duration;
use clap::Parser;
use cli::{Cli, Commands};
use warden_core::AuthConfig;
use warden_core::config::MAX_TTL_SECS;
use warden_core::auth::{password, tokens};
use warden_core::models::auth::UserId;

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::HashPassword { password, cost } => {
            println!("{}", password::hash_password(&password, cost)?);
        }
        Commands::VerifyPassword { password, hash } => {
            if !password::verify_password(&password, &hash)? {
                return Err(Error::Custom("password does not match".into()));
            }
            println!("match");
        }
        Commands::GenerateToken {
            user_id,
            scope,
            ttl_secs,
        } => {
            let ttl = Some(ttl_secs)
                .filter(|s| (1..=MAX_TTL_SECS).contains(s))
                .and_then(Duration::try_seconds)
                .ok_or_else(|| {
                    Error::Custom(format!("--ttl-secs must be between 1 and {MAX_TTL_SECS}"))
                })?;
            let token = tokens::generate_token(UserId(user_id), ttl, scope.into())?;
            log::info!("generated {} token for user {}", token.record.scope, user_id);
            println!("token:       {}", token.secret);
            println!("fingerprint: {}", token.record.fingerprint);
            println!("expiry:      {}", token.record.expiry.to_rfc3339());
        }
        Commands::Fingerprint { secret } => {
            println!("{}", tokens::fingerprint(&secret));
        }
        Commands::Config => {
            let config = AuthConfig::from_env();
            println!("token_ttl_secs:      {}", config.token_ttl.num_seconds());
            println!("activation_ttl_secs: {}", config.activation_ttl.num_seconds());
            println!("bcrypt_cost:         {}", config.bcrypt_cost);
        }
    }

    Ok(())
}
