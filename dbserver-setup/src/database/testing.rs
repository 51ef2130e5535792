// In-memory server instance for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::ServerInstance;

/// Records submitted SQL and answers with configured results.
pub(crate) struct StubInstance {
    /// Scripts reported as executed; `None` means "all of them".
    pub executed: Option<usize>,
    /// Error text returned by `execute_non_query`; `None` means success.
    pub non_query_error: Option<String>,
    pub script_calls: AtomicU32,
    pub non_query_calls: AtomicU32,
    pub scripts: Mutex<Vec<String>>,
    pub statements: Mutex<Vec<String>>,
}

impl StubInstance {
    pub fn ok() -> Self {
        Self {
            executed: None,
            non_query_error: None,
            script_calls: AtomicU32::new(0),
            non_query_calls: AtomicU32::new(0),
            scripts: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn reporting(executed: usize) -> Self {
        Self {
            executed: Some(executed),
            ..Self::ok()
        }
    }

    pub fn failing_non_query(error: &str) -> Self {
        Self {
            non_query_error: Some(error.to_string()),
            ..Self::ok()
        }
    }

    pub fn script_calls(&self) -> u32 {
        self.script_calls.load(Ordering::SeqCst)
    }

    pub fn non_query_calls(&self) -> u32 {
        self.non_query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerInstance for StubInstance {
    async fn execute_scripts(&self, _stop_on_error: bool, scripts: &[String]) -> usize {
        self.script_calls.fetch_add(1, Ordering::SeqCst);
        self.scripts.lock().unwrap().extend(scripts.iter().cloned());
        self.executed.unwrap_or(scripts.len())
    }

    async fn execute_non_query(&self, sql: &str) -> Result<(), String> {
        self.non_query_calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(sql.to_string());
        match &self.non_query_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
