use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveTime};
use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::clock::{BusinessHours, SystemClock};

const PREFIX: &str = "CHAIRTIME_";

#[derive(Debug)]
pub struct ConfigError(String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Process settings, read once from `CHAIRTIME_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub hours: BusinessHours,
    /// Offset of the studio's local time from UTC.
    pub utc_offset: FixedOffset,
}

fn parse_time(name: &str, raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| ConfigError(format!("{PREFIX}{name}={raw}: {e}")))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{PREFIX}{key}")).ok())
    }

    /// Build from any key lookup; keys are given without the prefix.
    /// Malformed numbers fall back to defaults, malformed hours are an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let num = |key: &str| get(key).and_then(|s| s.trim().parse::<i64>().ok());

        let open = parse_time("OPEN", &get("OPEN").unwrap_or_else(|| "10:00".into()))?;
        let close = parse_time("CLOSE", &get("CLOSE").unwrap_or_else(|| "21:00".into()))?;
        let slot_minutes = num("SLOT_MINUTES").unwrap_or(15);
        let granularity = i32::try_from(slot_minutes)
            .map_err(|_| ConfigError(format!("{PREFIX}SLOT_MINUTES out of range: {slot_minutes}")))?;
        let hours = BusinessHours::new(open, close, granularity).map_err(|e| ConfigError(e.to_string()))?;

        let offset_minutes = num("UTC_OFFSET_MINUTES").unwrap_or(0);
        let utc_offset = i32::try_from(offset_minutes * 60)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError(format!("{PREFIX}UTC_OFFSET_MINUTES out of range: {offset_minutes}")))?;

        Ok(Self {
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("PORT").and_then(|s| s.parse().ok()).unwrap_or(5433),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("PASSWORD").unwrap_or_else(|| "chairtime".into()),
            max_connections: get("MAX_CONNECTIONS").and_then(|s| s.parse().ok()).unwrap_or(256),
            compact_threshold: get("COMPACT_THRESHOLD").and_then(|s| s.parse().ok()).unwrap_or(1000),
            metrics_port: get("METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
            hours,
            utc_offset,
        })
    }

    pub fn clock(&self) -> SystemClock {
        SystemClock::new(self.utc_offset)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

pub fn load_tls_acceptor(cert_path: Option<&str>, key_path: Option<&str>) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both CHAIRTIME_TLS_CERT and CHAIRTIME_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
