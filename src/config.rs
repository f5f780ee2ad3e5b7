//! Devnet configuration, read from the process environment and the devnet dotfile.

use std::{
    collections::HashMap,
    fmt,
    path::{
        Path,
        PathBuf,
    },
};
use log::{
    debug, warn
};

use crate::{
    error::{
        Error,
        Result,
    },
    payments::{
        create_payments_config,
        PaymentsConfig,
        Wallet,
        NILLION_ADDRESS_PREFIX,
    },
};

pub const CLUSTER_ID_VAR: &str = "NILLION_CLUSTER_ID";
pub const GRPC_ENDPOINT_VAR: &str = "NILLION_NILCHAIN_GRPC";
pub const CHAIN_ID_VAR: &str = "NILLION_NILCHAIN_CHAIN_ID";
pub const PRIVATE_KEY_VAR: &str = "NILLION_NILCHAIN_PRIVATE_KEY_0";
pub const TELEMETRY_API_KEY_VAR: &str = "NILLION_TELEMETRY_API_KEY";

// get the path of the devnet env file, i.e. ~/.config/nillion/nillion-devnet.env
pub fn default_env_path() -> Result<PathBuf> {
    let home_dir = home::home_dir()
        .ok_or(Error::HomeDirUnavailable)?;
    Ok(home_dir.join(".config").join("nillion").join("nillion-devnet.env"))
}

// read `KEY=value` pairs without touching the process environment; a missing file is not an error
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if false == path.exists() {
        warn!("Env file `{}` does not exist, relying on the process environment.", path.display());
        return Ok(HashMap::new());
    }
    let env_file_error = |source| Error::EnvFile {
        path: path.to_path_buf(),
        source: source,
    };
    let vars = dotenvy::from_path_iter(path)
        .map_err(env_file_error)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(env_file_error)?;
    debug!("Read {} variable(s) from `{}`", vars.len(), path.display());
    Ok(vars)
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub cluster_id: String,
    pub grpc_endpoint: String,
    pub chain_id: String,
    // raw secp256k1 secret key of the paying wallet
    pub private_key: [u8; 32],
    pub telemetry_api_key: Option<String>,
}

impl Config {
    /// Load from the env file at `path`; variables already set in the process win.
    pub fn load(path: &Path) -> Result<Self> {
        let file_vars = read_env_file(path)?;
        Self::from_lookup(|name| {
            std::env::var(name)
                .ok()
                .or_else(|| file_vars.get(name).cloned())
        })
    }

    /// Build from any variable source; empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(Error::MissingEnv(name))
        };
        let private_key = parse_private_key(&required(PRIVATE_KEY_VAR)?)?;
        Ok(Self {
            cluster_id: required(CLUSTER_ID_VAR)?,
            grpc_endpoint: required(GRPC_ENDPOINT_VAR)?,
            chain_id: required(CHAIN_ID_VAR)?,
            private_key: private_key,
            telemetry_api_key: required(TELEMETRY_API_KEY_VAR).ok(),
        })
    }

    pub fn payments_config(&self) -> PaymentsConfig {
        create_payments_config(&self.chain_id, &self.grpc_endpoint)
    }

    pub fn wallet(&self) -> Result<Wallet> {
        Wallet::from_private_key(&self.private_key, NILLION_ADDRESS_PREFIX)
    }
}

// the private key is never printed
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cluster_id", &self.cluster_id)
            .field("grpc_endpoint", &self.grpc_endpoint)
            .field("chain_id", &self.chain_id)
            .field("telemetry_api_key", &self.telemetry_api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn parse_private_key(value: &str) -> Result<[u8; 32]> {
    let hex_key = value.strip_prefix("0x").unwrap_or(value);
    let mut key = [0u8; 32];
    hex::decode_to_slice(hex_key, &mut key)
        .map_err(|e| Error::InvalidPrivateKey(format!("`{PRIVATE_KEY_VAR}` must be 32 hex-encoded bytes: {e}")))?;
    // reject keys that are well-formed hex but not valid secp256k1 scalars
    Wallet::from_hex(hex_key, NILLION_ADDRESS_PREFIX)?;
    Ok(key)
}
