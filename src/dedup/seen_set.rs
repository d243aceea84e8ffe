use {
    super::DedupStore,
    crate::{
        persistence::{self, current_timestamp, PersistenceError},
        types::TransactionRecord,
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashSet, VecDeque},
        path::{Path, PathBuf},
    },
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenSetSnapshot {
    #[serde(default)]
    saved_at: i64,
    #[serde(default)]
    strategy: String,
    /// address -> hashes, oldest first
    #[serde(default)]
    seen: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
struct AddressSeen {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl AddressSeen {
    fn insert(&mut self, hash: String, max: usize) {
        if !self.members.insert(hash.clone()) {
            return;
        }
        self.order.push_back(hash);

        if max > 0 {
            while self.order.len() > max {
                if let Some(evicted) = self.order.pop_front() {
                    self.members.remove(&evicted);
                }
            }
        }
    }
}

/// Hash-set dedup, scoped per address
pub struct SeenSetStore {
    path: PathBuf,
    /// 0 = unbounded
    max_per_address: usize,
    committed: BTreeMap<String, AddressSeen>,
    staged: Vec<(String, String)>,
    staged_index: HashSet<(String, String)>,
}

impl SeenSetStore {
    pub fn load(path: impl AsRef<Path>, max_per_address: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot: SeenSetSnapshot = persistence::load_json_or_default(&path);

        if !snapshot.strategy.is_empty() && snapshot.strategy != "set" {
            log::warn!(
                "⚠️  {} was written by the '{}' strategy, starting with an empty seen-set",
                path.display(),
                snapshot.strategy
            );
        }

        let mut committed = BTreeMap::new();
        for (address, hashes) in snapshot.seen {
            let entry: &mut AddressSeen = committed.entry(address).or_default();
            for hash in hashes {
                entry.insert(hash.to_ascii_lowercase(), max_per_address);
            }
        }

        Self {
            path,
            max_per_address,
            committed,
            staged: Vec::new(),
            staged_index: HashSet::new(),
        }
    }

    fn snapshot_of(state: &BTreeMap<String, AddressSeen>) -> SeenSetSnapshot {
        SeenSetSnapshot {
            saved_at: current_timestamp(),
            strategy: "set".to_string(),
            seen: state
                .iter()
                .map(|(address, seen)| (address.clone(), seen.order.iter().cloned().collect()))
                .collect(),
        }
    }
}

impl DedupStore for SeenSetStore {
    fn is_new(&self, address: &str, tx: &TransactionRecord) -> bool {
        let hash = tx.identity();
        let committed = self
            .committed
            .get(address)
            .map(|seen| seen.members.contains(&hash))
            .unwrap_or(false);

        !committed && !self.staged_index.contains(&(address.to_string(), hash))
    }

    fn mark_seen(&mut self, address: &str, tx: &TransactionRecord) {
        if !self.is_new(address, tx) {
            return;
        }
        let key = (address.to_string(), tx.identity());
        self.staged_index.insert(key.clone());
        self.staged.push(key);
    }

    fn persist(&mut self) -> Result<(), PersistenceError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut next = self.committed.clone();
        for (address, hash) in &self.staged {
            next.entry(address.clone())
                .or_default()
                .insert(hash.clone(), self.max_per_address);
        }

        persistence::write_json_atomic(&self.path, &Self::snapshot_of(&next))?;
        self.committed = next;

        log::debug!("Committed {} seen transactions", self.staged.len());
        self.staged.clear();
        self.staged_index.clear();
        Ok(())
    }

    fn rollback(&mut self) {
        if !self.staged.is_empty() {
            log::debug!("Discarding {} staged seen transactions", self.staged.len());
        }
        self.staged.clear();
        self.staged_index.clear();
    }

    fn tracked_addresses(&self) -> usize {
        self.committed.len()
    }

    fn strategy(&self) -> &'static str {
        "set"
    }
}
