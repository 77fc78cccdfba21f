use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const MONAD_TESTNET_COINFLIP: &str = "0x4A3D7D2cE634ACe79de2DCD5461590bdf567dB29";
pub const MONAD_TESTNET_RPC_URL: &str = "https://testnet-rpc.monad.xyz";
pub const MONAD_TESTNET_EXPLORER: &str = "https://testnet.monadexplorer.com";
pub const MONAD_TICKER: &str = "MON";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub contract_address: String,
    pub network_url: String,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub native_ticker: Option<String>,
    /// sha-256 of the runtime code observed when the record was written.
    #[serde(default)]
    pub code_hash: Option<String>,
}

impl DeploymentRecord {
    /// Records without a hash predate verification and are accepted as-is.
    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.code_hash
            .as_deref()
            .map(|recorded| recorded.eq_ignore_ascii_case(hash))
            .unwrap_or(true)
    }

    pub fn explorer_tx_url(&self, transaction_id: &str) -> Option<String> {
        self.explorer_url
            .as_deref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), transaction_id))
    }

    pub fn ticker(&self) -> &str {
        self.native_ticker.as_deref().unwrap_or(MONAD_TICKER)
    }
}

/// The record used when nothing has been registered for `env`.
pub fn default_record(env: DeploymentEnv) -> Option<DeploymentRecord> {
    match env {
        DeploymentEnv::Test => Some(DeploymentRecord {
            recorded_at: String::from("builtin"),
            contract_address: MONAD_TESTNET_COINFLIP.to_string(),
            network_url: MONAD_TESTNET_RPC_URL.to_string(),
            explorer_url: Some(MONAD_TESTNET_EXPLORER.to_string()),
            native_ticker: Some(MONAD_TICKER.to_string()),
            code_hash: None,
        }),
        DeploymentEnv::Local => None,
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::with_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn with_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }
}

pub fn compute_code_hash(code: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code);
    hex::encode(hasher.finalize())
}

pub fn ensure_structure() -> Result<()> {
    for env in [DeploymentEnv::Test, DeploymentEnv::Local] {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!(
                "Failed to create {}/{} directory",
                root.display(),
                env.dir_name()
            )
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

pub fn record_deployment(
    store: &DeploymentStore,
    contract_address: impl AsRef<str>,
    network_url: impl AsRef<str>,
    explorer_url: Option<impl AsRef<str>>,
    native_ticker: Option<impl AsRef<str>>,
    code: &[u8],
) -> Result<DeploymentRecord> {
    let record = DeploymentRecord {
        recorded_at: Utc::now().to_rfc3339(),
        contract_address: contract_address.as_ref().to_string(),
        network_url: network_url.as_ref().to_string(),
        explorer_url: explorer_url.map(|url| url.as_ref().to_string()),
        native_ticker: native_ticker.map(|ticker| ticker.as_ref().to_string()),
        code_hash: Some(compute_code_hash(code)),
    };
    store.save(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn load__returns_none_for_fresh_store() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::with_root(dir.path(), DeploymentEnv::Local).unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert!(loaded.is_none());
    }

    #[test]
    fn record_deployment__round_trips_through_the_store() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::with_root(dir.path(), DeploymentEnv::Test).unwrap();

        // when
        let written = record_deployment(
            &store,
            MONAD_TESTNET_COINFLIP,
            MONAD_TESTNET_RPC_URL,
            Some(MONAD_TESTNET_EXPLORER),
            Some(MONAD_TICKER),
            &[0x60, 0x80, 0x60, 0x40],
        )
        .unwrap();

        // then
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, written);
        assert!(loaded.is_compatible_with_hash(&compute_code_hash(&[0x60, 0x80, 0x60, 0x40])));
        assert!(!loaded.is_compatible_with_hash(&compute_code_hash(&[0x00])));
    }

    #[test]
    fn explorer_tx_url__joins_base_and_hash() {
        // given
        let mut record = default_record(DeploymentEnv::Test).unwrap();
        record.explorer_url = Some(format!("{MONAD_TESTNET_EXPLORER}/"));

        // when
        let url = record.explorer_tx_url("0xabc");

        // then
        assert_eq!(
            url.as_deref(),
            Some("https://testnet.monadexplorer.com/tx/0xabc")
        );
    }

    #[test]
    fn is_compatible_with_hash__accepts_records_without_hash() {
        let record = default_record(DeploymentEnv::Test).unwrap();
        assert!(record.is_compatible_with_hash("anything"));
    }
}
