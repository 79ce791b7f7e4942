//! Pool de connexions PostgreSQL
//!
//! La configuration part des variables d'environnement (`PGHOST`, `PGPORT`...)
//! et est complétée par la chaîne de connexion `PG:host=... dbname=...`.

use anyhow::{bail, Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::config::{Host, SslMode as PgSslMode};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// Pas de SSL (défaut)
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    /// SSL requis
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" | "allow" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {}. Use: disable, prefer, require", s)),
        }
    }
}

/// Configuration de la base de données
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
    /// Schéma des tables lues et créées
    pub schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "postgres".into(),
            user: "postgres".into(),
            password: None,
            pool_size: 2,
            ssl_mode: SslMode::Disable,
            schema: "public".into(),
        }
    }
}

impl DatabaseConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PGHOST").unwrap_or(defaults.host),
            port: std::env::var("PGPORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("PGDATABASE").unwrap_or(defaults.dbname),
            user: std::env::var("PGUSER").unwrap_or(defaults.user),
            password: std::env::var("PGPASSWORD").ok(),
            pool_size: std::env::var("POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            ssl_mode: std::env::var("PGSSLMODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            schema: defaults.schema,
        }
    }

    /// Parse une chaîne `PG:host=... port=... dbname=... user=... password=...
    /// sslmode=... schemas=...`; les clés absentes viennent de l'environnement.
    ///
    /// La syntaxe libpq (valeurs entre apostrophes, échappements) est confiée
    /// à `tokio_postgres::Config`; seule la clé `schemas` (ou `active_schema`)
    /// est extraite avant.
    pub fn from_connection_string(connection: &str) -> Result<Self> {
        let body = match connection.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("PG:") => &connection[3..],
            _ => bail!("Not a PostgreSQL connection string: {}", connection),
        };

        let (body, schemas) = take_schemas(body);
        let parsed: tokio_postgres::Config = body
            .parse()
            .with_context(|| format!("Invalid connection string: {}", connection))?;

        let mut config = Self::from_env();
        match parsed.get_hosts().first() {
            Some(Host::Tcp(host)) => config.host = host.clone(),
            #[cfg(unix)]
            Some(Host::Unix(path)) => config.host = path.display().to_string(),
            None => {
                if let Some(addr) = parsed.get_hostaddrs().first() {
                    config.host = addr.to_string();
                }
            }
        }
        if let Some(port) = parsed.get_ports().first() {
            config.port = *port;
        }
        if let Some(dbname) = parsed.get_dbname() {
            config.dbname = dbname.to_string();
        }
        if let Some(user) = parsed.get_user() {
            config.user = user.to_string();
        }
        if let Some(password) = parsed.get_password() {
            config.password = Some(
                String::from_utf8(password.to_vec())
                    .context("Password in connection string is not valid UTF-8")?,
            );
        }
        // tokio-postgres vaut `prefer` par défaut: PGSSLMODE reste prioritaire
        // tant que la chaîne ne précise rien
        if has_sslmode(&body) {
            config.ssl_mode = match parsed.get_ssl_mode() {
                PgSslMode::Disable => SslMode::Disable,
                PgSslMode::Prefer => SslMode::Prefer,
                _ => SslMode::Require,
            };
        }
        if let Some(schema) = schemas
            .as_deref()
            .and_then(|list| list.split(',').map(str::trim).find(|s| !s.is_empty()))
        {
            config.schema = schema.to_string();
        }
        Ok(config)
    }

    /// Chaîne affichable (sans mot de passe)
    pub fn display_name(&self) -> String {
        format!(
            "PG:host={} port={} dbname={} user={} schemas={}",
            self.host, self.port, self.dbname, self.user, self.schema
        )
    }
}

fn schemas_key() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|\s)(?:schemas|active_schema)\s*=\s*('(?:[^'\\]|\\.)*'|\S+)").ok()
    })
    .as_ref()
}

fn has_sslmode(body: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|\s)sslmode\s*=").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(body))
}

/// Retire les clés de schéma (inconnues de libpq); la dernière l'emporte
fn take_schemas(body: &str) -> (String, Option<String>) {
    let Some(re) = schemas_key() else {
        return (body.to_string(), None);
    };
    let schemas = re
        .captures_iter(body)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('\'').to_string());
    (re.replace_all(body, " ").into_owned(), schemas)
}

/// Crée la configuration TLS pour rustls
fn make_tls_connector() -> Result<MakeRustlsConnect> {
    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

/// Crée un pool de connexions
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();

    cfg.pool = Some(PoolConfig {
        max_size: config.pool_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });

    match config.ssl_mode {
        SslMode::Disable => cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create database pool"),
        SslMode::Prefer | SslMode::Require => {
            let tls = make_tls_connector()?;
            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .context("Failed to create database pool with TLS")
        }
    }
}

/// Teste la connexion à la base
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;
    client
        .execute("SELECT 1", &[])
        .await
        .context("Connection test failed")?;
    Ok(())
}
