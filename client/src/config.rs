use anyhow::{Context, Result};
use reqwest::{Certificate, Client};
use std::{env, fmt, fs, path::PathBuf, time::Duration};
use tracing::warn;

pub const DEFAULT_CANDLEPIN_URL: &str = "https://localhost:8443/candlepin";
pub const DEFAULT_CA_CERT: &str = "/etc/candlepin/certs/candlepin-ca.crt";
pub const DEFAULT_DEADLINE_SECS: u64 = 20;

/// Conexión y parámetros del import.
/// Todo sale de variables de entorno con defaults para un Candlepin local:
/// - CANDLEPIN_URL, CANDLEPIN_USERNAME, CANDLEPIN_PASSWORD, CANDLEPIN_CA_CERT
/// - IMPORT_CONCURRENCY (sin definir = sin límite)
/// - IMPORT_DEADLINE_SECS
#[derive(Clone)]
pub struct Settings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub ca_cert: PathBuf,
    pub concurrency: Option<usize>,
    pub deadline: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let concurrency = lookup("IMPORT_CONCURRENCY").and_then(|s| s.parse::<usize>().ok());
        let deadline_secs = lookup("IMPORT_DEADLINE_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DEADLINE_SECS);

        Self {
            base_url: or_default("CANDLEPIN_URL", DEFAULT_CANDLEPIN_URL)
                .trim_end_matches('/')
                .to_string(),
            username: or_default("CANDLEPIN_USERNAME", "admin"),
            password: or_default("CANDLEPIN_PASSWORD", "admin"),
            ca_cert: PathBuf::from(or_default("CANDLEPIN_CA_CERT", DEFAULT_CA_CERT)),
            concurrency,
            deadline: Duration::from_secs(deadline_secs),
        }
    }

    /// Cliente HTTP con la CA de Candlepin si existe; si no, sin verificar
    /// certificados (servidor de desarrollo con certificado autofirmado).
    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder();

        if self.ca_cert.exists() {
            let pem = fs::read(&self.ca_cert)
                .with_context(|| format!("no se pudo leer la CA {}", self.ca_cert.display()))?;
            let cert = Certificate::from_pem(&pem)
                .with_context(|| format!("CA inválida en {}", self.ca_cert.display()))?;
            builder = builder.add_root_certificate(cert);
        } else {
            warn!(
                "no existe {}, se desactiva la verificación TLS",
                self.ca_cert.display()
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().context("no se pudo construir el cliente HTTP")
    }
}

// El password nunca va a los logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("ca_cert", &self.ca_cert)
            .field("concurrency", &self.concurrency)
            .field("deadline", &self.deadline)
            .finish()
    }
}
