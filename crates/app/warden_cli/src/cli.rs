use clap::{Parser, Subcommand, ValueEnum};
use warden_core::models::auth::TokenScope;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden access-control utilities")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Hash a password with bcrypt and print the digest.
    HashPassword {
        password: String,

        /// bcrypt work factor.
        #[arg(long, env = "WARDEN_BCRYPT_COST", default_value_t = 12)]
        cost: u32,
    },

    /// Check a password against a bcrypt digest. Exits non-zero on mismatch.
    VerifyPassword { password: String, hash: String },

    /// Generate a bearer token and print the secret, its fingerprint and expiry.
    GenerateToken {
        /// Owner of the token.
        #[arg(long)]
        user_id: i64,

        #[arg(long, value_enum, default_value_t = Scope::Authentication)]
        scope: Scope,

        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3 * 24 * 60 * 60)]
        ttl_secs: i64,
    },

    /// Print the SHA-256 fingerprint a secret is stored under.
    Fingerprint { secret: String },

    /// Print the effective auth configuration read from the environment.
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Scope {
    Authentication,
    Activation,
}

impl From<Scope> for TokenScope {
    fn from(s: Scope) -> Self {
        match s {
            Scope::Authentication => TokenScope::Authentication,
            Scope::Activation => TokenScope::Activation,
        }
    }
}
