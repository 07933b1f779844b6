use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::generation::GenerationClient;

/// (chat id, user id)
pub type GenerationKey = (i64, i64);

#[derive(Debug)]
pub struct ActiveGeneration {
    pub id: u64,
    pub token: CancellationToken,
}

/// In-flight generations, one per user per chat.
#[derive(Debug, Default)]
pub struct ActiveGenerations {
    next_id: AtomicU64,
    entries: Mutex<HashMap<GenerationKey, ActiveGeneration>>,
}

impl ActiveGenerations {
    /// Registers a new generation, cancelling one the same user still has running.
    pub fn begin(&self, key: GenerationKey) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.entries.lock().insert(
            key,
            ActiveGeneration {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        (id, token)
    }

    pub fn finish(&self, key: GenerationKey, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(&key).is_some_and(|entry| entry.id == id) {
            entries.remove(&key);
        }
    }

    pub fn cancel(&self, key: GenerationKey) -> bool {
        match self.entries.lock().remove(&key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<GenerationClient>,
    pub active_generations: Arc<ActiveGenerations>,
}

impl AppState {
    pub fn new(client: GenerationClient) -> Self {
        AppState {
            client: Arc::new(client),
            active_generations: Arc::new(ActiveGenerations::default()),
        }
    }
}
