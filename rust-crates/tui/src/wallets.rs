use alloy::{
    primitives::Address,
    signers::local::PrivateKeySigner,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

/// `cast wallet import` keeps its keystores here.
pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Keystores are plain files named after the account; a `.json` suffix is
/// tolerated and stripped from the name.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read wallet directory")? {
        let entry = entry.wrap_err("Failed to read wallet entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let name = file_name.strip_suffix(".json").unwrap_or(file_name).to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

pub fn unlock_wallet(descriptor: &WalletDescriptor) -> Result<PrivateKeySigner> {
    let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
    let password = prompt_password(prompt).wrap_err("Failed to read wallet password")?;
    unlock_with_password(descriptor, &password)
}

pub fn unlock_with_password(
    descriptor: &WalletDescriptor,
    password: &str,
) -> Result<PrivateKeySigner> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;
    PrivateKeySigner::from_slice(&secret).map_err(|_| {
        eyre!(
            "Wallet '{}' does not contain a secp256k1 private key",
            descriptor.name
        )
    })
}

/// Reads the plaintext `address` field of a keystore without decrypting it.
pub fn keystore_address(descriptor: &WalletDescriptor) -> Result<Address> {
    #[derive(serde::Deserialize)]
    struct KeystoreHeader {
        address: Option<String>,
    }

    let data = fs::read(&descriptor.path)
        .wrap_err_with(|| format!("Failed to read wallet '{}'", descriptor.name))?;
    let header: KeystoreHeader = serde_json::from_slice(&data)
        .wrap_err_with(|| format!("Wallet '{}' is not a JSON keystore", descriptor.name))?;
    let raw = header
        .address
        .ok_or_else(|| eyre!("Wallet '{}' does not record its address", descriptor.name))?;
    let hex = raw.strip_prefix("0x").unwrap_or(&raw);
    hex.parse()
        .wrap_err_with(|| format!("Wallet '{}' has a malformed address", descriptor.name))
}
