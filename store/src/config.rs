use serde::{Deserialize, Serialize};

/// Connection parameters for [`crate::sql::SqlPersistenceEngine`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqlEngineConfig {
    pub connection_url: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_table_name() -> String {
    "chunks".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl SqlEngineConfig {
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            connection_url: connection_url.into(),
            table_name: default_table_name(),
            max_connections: default_max_connections(),
            idle_timeout_secs: None,
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}
