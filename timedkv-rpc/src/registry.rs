//! Resolves the RPC `DB` parameter to one of the server's
//! open databases, by logical name or numeric index.

use std::sync::Arc;
use timedkv_common::{get_str, ParamMap, TimedKvError};
use timedkv_store::TimedDb;

pub struct DatabaseRegistry {
    databases: Vec<Arc<TimedDb>>,
}

impl DatabaseRegistry {
    pub fn new(databases: Vec<Arc<TimedDb>>) -> Self {
        Self { databases }
    }

    pub fn all(&self) -> &[Arc<TimedDb>] {
        &self.databases
    }

    /// `DB` absent defaults to index 0.
    pub fn resolve(&self, params: &ParamMap) -> Result<&Arc<TimedDb>, TimedKvError> {
        match get_str(params, "DB") {
            None => self.databases.first().ok_or_else(|| TimedKvError::Invalid("no database configured".to_string())),
            Some(selector) => {
                if let Ok(index) = selector.parse::<usize>() {
                    if let Some(db) = self.databases.get(index) {
                        return Ok(db);
                    }
                }
                self.databases
                    .iter()
                    .find(|db| db.name() == selector)
                    .ok_or_else(|| TimedKvError::Invalid(format!("no such database: {selector}")))
            }
        }
    }
}
