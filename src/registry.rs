//! Watch registry: persisted (recipient, label) -> address subscriptions
//!
//! Every mutating call writes the full registry to disk before returning.
//! If that write fails the in-memory change is rolled back, so memory and
//! disk never disagree about which subscriptions exist.

use {
    crate::{
        persistence::{self, current_timestamp, PersistenceError},
        types::{normalize_address, RecipientId, Subscription},
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashSet},
        path::{Path, PathBuf},
        sync::Arc,
    },
    tokio::sync::RwLock,
};

/// Registry shared between the command path and the cycle driver
pub type SharedRegistry = Arc<RwLock<WatchRegistry>>;

#[derive(Debug)]
pub enum RegistryError {
    DuplicateLabel(String),
    NotFound(String),
    InvalidInput(String),
    Persistence(PersistenceError),
}

impl From<PersistenceError> for RegistryError {
    fn from(err: PersistenceError) -> Self {
        RegistryError::Persistence(err)
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateLabel(label) => {
                write!(f, "a wallet named '{}' is already being tracked", label)
            }
            RegistryError::NotFound(label) => write!(f, "no wallet named '{}' found", label),
            RegistryError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            RegistryError::Persistence(e) => write!(f, "could not save subscriptions: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Longest accepted label, in characters. Keeps every rendered
/// notification line far below the chat message limit.
pub const MAX_LABEL_CHARS: usize = 64;

/// On-disk layout of the registry
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistrySnapshot {
    #[serde(default)]
    saved_at: i64,
    subscriptions: Vec<Subscription>,
}

/// Layouts accepted on load
///
/// `Legacy` is the older `{"<chat id>": {"<label>": "<address>"}}` map; it
/// is imported and rewritten in the current layout on the next save.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRegistry {
    Current(RegistrySnapshot),
    Legacy(BTreeMap<String, BTreeMap<String, String>>),
}

impl Default for StoredRegistry {
    fn default() -> Self {
        StoredRegistry::Current(RegistrySnapshot::default())
    }
}

fn import_legacy(path: &Path, chats: BTreeMap<String, BTreeMap<String, String>>) -> Vec<Subscription> {
    let mut subscriptions = Vec::new();

    for (chat, wallets) in chats {
        let recipient_id = match chat.trim().parse::<i64>() {
            Ok(id) => RecipientId(id),
            Err(_) => {
                log::warn!("⚠️  Skipping legacy entry with non-numeric chat id '{}'", chat);
                continue;
            }
        };
        for (label, address) in wallets {
            subscriptions.push(Subscription {
                recipient_id,
                label: label.trim().to_string(),
                address,
            });
        }
    }

    if !subscriptions.is_empty() {
        log::info!(
            "♻️  Importing {} subscriptions from legacy layout in {}",
            subscriptions.len(),
            path.display()
        );
        persistence::preserve_copy(path, "legacy");
    }
    subscriptions
}

pub struct WatchRegistry {
    path: PathBuf,
    /// Insertion order is the listing order
    subscriptions: Vec<Subscription>,
}

impl WatchRegistry {
    /// Load from `path`, starting empty if the file is absent or corrupt
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let stored = match persistence::load_json_or_default(&path) {
            StoredRegistry::Current(snapshot) => snapshot.subscriptions,
            StoredRegistry::Legacy(chats) => import_legacy(&path, chats),
        };

        // Re-establish invariants on whatever was on disk
        let mut seen = HashSet::new();
        let subscriptions: Vec<Subscription> = stored
            .into_iter()
            .map(|mut s| {
                s.address = normalize_address(&s.address);
                s
            })
            .filter(|s| seen.insert((s.recipient_id, s.label.clone())))
            .collect();

        log::info!(
            "📋 Loaded {} subscriptions from {}",
            subscriptions.len(),
            path.display()
        );

        Self {
            path,
            subscriptions,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn register(
        &mut self,
        recipient_id: RecipientId,
        label: &str,
        address: &str,
    ) -> Result<Subscription, RegistryError> {
        let label = label.trim();
        let address = normalize_address(address);

        if label.is_empty() || label.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidInput(
                "label must be a single non-empty word".to_string(),
            ));
        }
        if label.chars().count() > MAX_LABEL_CHARS {
            return Err(RegistryError::InvalidInput(format!(
                "label must be at most {} characters",
                MAX_LABEL_CHARS
            )));
        }
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidInput(
                "address must be a single non-empty word".to_string(),
            ));
        }
        if self.find(recipient_id, label).is_some() {
            return Err(RegistryError::DuplicateLabel(label.to_string()));
        }

        let subscription = Subscription {
            recipient_id,
            label: label.to_string(),
            address,
        };
        self.subscriptions.push(subscription.clone());

        if let Err(e) = self.persist() {
            self.subscriptions.pop();
            return Err(e.into());
        }

        log::info!(
            "➕ {} now watches {} as '{}'",
            recipient_id,
            subscription.address,
            subscription.label
        );
        Ok(subscription)
    }

    pub fn unregister(&mut self, recipient_id: RecipientId, label: &str) -> Result<(), RegistryError> {
        let label = label.trim();
        let index = self
            .find(recipient_id, label)
            .ok_or_else(|| RegistryError::NotFound(label.to_string()))?;

        let removed = self.subscriptions.remove(index);

        if let Err(e) = self.persist() {
            self.subscriptions.insert(index, removed);
            return Err(e.into());
        }

        log::info!("➖ {} stopped watching '{}'", recipient_id, removed.label);
        Ok(())
    }

    /// Subscriptions of one recipient, in insertion order
    pub fn list(&self, recipient_id: RecipientId) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    /// Snapshot of every subscription
    pub fn all(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }

    /// Distinct addresses in first-seen order
    pub fn watched_addresses(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.subscriptions
            .iter()
            .filter(|s| seen.insert(s.address.as_str()))
            .map(|s| s.address.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn find(&self, recipient_id: RecipientId, label: &str) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| s.recipient_id == recipient_id && s.label == label)
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let snapshot = RegistrySnapshot {
            saved_at: current_timestamp(),
            subscriptions: self.subscriptions.clone(),
        };
        persistence::write_json_atomic(&self.path, &snapshot)
    }
}
