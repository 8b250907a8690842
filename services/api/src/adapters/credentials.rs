//! services/api/src/adapters/credentials.rs
//!
//! A `CredentialStore` over a flat text ledger with one `account<sep>secret`
//! entry per line. Older ledgers were edited by hand, so several separators
//! are accepted and secrets may be plain text; new entries are always
//! written as `account:secret`.

use async_trait::async_trait;
use chat_core::ports::{CredentialStore, PortError, PortResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Tried in order; the first one present on a line splits it.
const SEPARATORS: [char; 4] = [':', ',', ' ', '\t'];

/// Splits one ledger line into `(account, secret)`. Comments, blank lines and
/// lines without a usable separator yield `None`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    SEPARATORS.iter().find_map(|sep| {
        let (account, secret) = line.split_once(*sep)?;
        let (account, secret) = (account.trim(), secret.trim());
        (!account.is_empty() && !secret.is_empty()).then_some((account, secret))
    })
}

/// Whether `account` can be written as a ledger key and read back as the
/// same key.
pub fn is_ledger_key(account: &str) -> bool {
    !account.is_empty()
        && !account
            .chars()
            .any(|c| c == '#' || c.is_whitespace() || SEPARATORS.contains(&c))
}

pub struct FileCredentialStore {
    path: PathBuf,
    // Serialises appends.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_ledger(&self) -> PortResult<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(PortError::Unexpected(format!("read {}: {}", self.path.display(), e))),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn find_secret(&self, account: &str) -> PortResult<Option<String>> {
        let wanted = account.trim();
        let ledger = self.read_ledger().await?;
        Ok(ledger
            .lines()
            .filter_map(parse_line)
            .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .map(|(_, secret)| secret.to_string()))
    }

    async fn register(&self, account: &str, secret: &str) -> PortResult<()> {
        let account = account.trim();
        if !is_ledger_key(account) {
            return Err(PortError::Unexpected(format!(
                "account '{}' cannot be stored in the credential ledger",
                account
            )));
        }
        if secret.contains(['\n', '\r']) {
            return Err(PortError::Unexpected("secret spans several lines".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        let existing = self.read_ledger().await?;
        let mut entry = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(&format!("{}:{}\n", account, secret));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PortError::Unexpected(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        file.flush().await.map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!(account = %account, "Registered credentials.");
        Ok(())
    }
}
