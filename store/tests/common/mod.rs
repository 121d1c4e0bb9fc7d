use std::sync::{Arc, Mutex};

use store::{Chunk, PersistenceEngine, PersistenceError, Subscription};

pub async fn sqlite_engine(table_name: &str) -> store::SqlPersistenceEngine {
    use sqlx::any::{install_default_drivers, AnyPoolOptions};
    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .connect("sqlite::memory:")
        .await
        .expect("could not create pool");

    let engine = store::SqlPersistenceEngine::new(pool, table_name, store::JsonSerializer::default());
    engine.init().await.expect("failed to initialize schema");
    engine
}

/// Collects everything delivered to it, for assertions against the order
/// and contents of a scan.
pub struct CollectingSubscription {
    collected: Mutex<Vec<Chunk>>,
    errors: Mutex<Vec<String>>,
    stop_after: Option<usize>,
}

impl CollectingSubscription {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            collected: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            stop_after: None,
        })
    }

    pub fn stopping_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            collected: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            stop_after: Some(n),
        })
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.collected.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Subscription for CollectingSubscription {
    async fn on_next(&self, chunk: Chunk) -> bool {
        let mut collected = self.collected.lock().unwrap();
        collected.push(chunk);
        match self.stop_after {
            Some(n) => collected.len() < n,
            None => true,
        }
    }

    async fn on_error(&self, _last: i64, err: &PersistenceError) {
        self.errors.lock().unwrap().push(err.to_string());
    }
}
