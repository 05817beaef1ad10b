//! Known peer stores, loaded from the `federation.peers` config list.

use std::collections::BTreeMap;

use crate::config::PeerStore;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<String, PeerStore>,
}

impl PeerDirectory {
    /// Later entries with a repeated store id replace earlier ones.
    pub fn new(peers: impl IntoIterator<Item = PeerStore>) -> Self {
        Self {
            peers: peers
                .into_iter()
                .map(|peer| (peer.store_id.clone(), peer))
                .collect(),
        }
    }

    pub fn get(&self, store_id: &str) -> Option<&PeerStore> {
        self.peers.get(store_id)
    }

    /// A peer we may pull from.
    pub fn pull_source(&self, store_id: &str) -> AppResult<&PeerStore> {
        match self.get(store_id) {
            Some(peer) if peer.pull_enabled => Ok(peer),
            Some(_) => Err(AppError::BadRequest(format!(
                "Pulling from store {store_id} is disabled"
            ))),
            None => Err(AppError::NotFound(format!("Unknown peer store {store_id}"))),
        }
    }

    pub fn pull_sources(&self) -> impl Iterator<Item = &PeerStore> {
        self.peers.values().filter(|peer| peer.pull_enabled)
    }
}
