// Local server instance
//
// `ServerInstance` is the execution boundary the setup core talks to. Production code uses
// `MySqlServerInstance` (sqlx); tests use in-memory stubs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, Pool};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::utils::logging::mask_connection_string;

/// An already-running server capable of executing SQL text.
#[async_trait]
pub trait ServerInstance: Send + Sync {
    /// Execute `scripts` in order and return how many completed without error.
    /// With `stop_on_error`, execution stops at the first failing script.
    async fn execute_scripts(&self, stop_on_error: bool, scripts: &[String]) -> usize;

    /// Execute a single statement. `Err` carries the server's error text.
    async fn execute_non_query(&self, sql: &str) -> Result<(), String>;
}

/// MySQL-protocol server instance backed by a single-connection sqlx pool.
///
/// One connection keeps `USE <schema>` from a script in effect for the batches that follow it.
#[derive(Clone)]
pub struct MySqlServerInstance {
    pool: Pool<MySql>,
}

impl MySqlServerInstance {
    pub async fn connect(connection_string: &str, connect_timeout: Duration) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(connect_timeout)
            .connect(connection_string)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to {}",
                    mask_connection_string(connection_string)
                )
            })?;
        Ok(Self { pool })
    }

    pub async fn server_version(&self) -> Result<String> {
        let v: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await
            .with_context(|| "Failed to query server version")?;
        Ok(v)
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .with_context(|| "Failed to acquire connection")?;

        for (i, batch) in split_delimiter_batches(script).iter().enumerate() {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(batch))
                .await
                .with_context(|| format!("Batch {} failed", i + 1))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ServerInstance for MySqlServerInstance {
    async fn execute_scripts(&self, stop_on_error: bool, scripts: &[String]) -> usize {
        let mut executed = 0;
        for (i, script) in scripts.iter().enumerate() {
            match self.execute_script(script).await {
                Ok(()) => {
                    executed += 1;
                    debug!(
                        "[PHASE: database] [STEP: execute_scripts] Script {}/{} executed",
                        i + 1,
                        scripts.len()
                    );
                }
                Err(e) => {
                    warn!(
                        "[PHASE: database] [STEP: execute_scripts] Script {}/{} failed: {:#}",
                        i + 1,
                        scripts.len(),
                        e
                    );
                    if stop_on_error {
                        break;
                    }
                }
            }
        }
        executed
    }

    async fn execute_non_query(&self, sql: &str) -> Result<(), String> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Connect to the local instance with a per-attempt timeout and bounded retries for transient
/// failures.
pub async fn connect_instance(
    connection_string: &str,
    connect_timeout: Duration,
    retries: u32,
) -> Result<MySqlServerInstance> {
    info!(
        "[PHASE: database] [STEP: connect] Connecting to {}",
        mask_connection_string(connection_string)
    );

    retry_bounded(
        retries,
        connect_timeout,
        || MySqlServerInstance::connect(connection_string, connect_timeout),
        || anyhow::anyhow!("Connection attempt timed out"),
        |e: &anyhow::Error| {
            let transient = is_transient_connect_error(e);
            if transient {
                warn!(
                    "[PHASE: database] [STEP: connect] Transient connection failure; will retry: {:#}",
                    e
                );
            }
            transient
        },
    )
    .await
}

/// Run `attempt` at most `attempts` times (minimum 1), each bounded by `per_attempt`.
///
/// Failures accepted by `retry_if` are retried after a jittered exponential backoff; any
/// other failure is returned immediately. A timed-out attempt fails with `timed_out()`.
async fn retry_bounded<T, E, A, Fut, P, TO>(
    attempts: u32,
    per_attempt: Duration,
    mut attempt: A,
    timed_out: TO,
    retry_if: P,
) -> Result<T, E>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    TO: Fn() -> E,
{
    let timed_out = &timed_out;
    let action = move || {
        let fut = attempt();
        async move {
            match timeout(per_attempt, fut).await {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            }
        }
    };

    // 100ms, 200ms, 400ms, ... capped at 2s, before jitter.
    let retry_strategy = ExponentialBackoff::from_millis(2)
        .factor(50)
        .max_delay(Duration::from_secs(2))
        .take(attempts.max(1).saturating_sub(1) as usize)
        .map(jitter);

    RetryIf::spawn(retry_strategy, action, retry_if).await
}

fn is_transient_connect_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("timed out")
        || msg.contains("timeout")
        || msg.contains("network")
        || msg.contains("connection")
        || msg.contains("i/o")
        || msg.contains("reset")
        || msg.contains("refused")
}

/// Split a script into batches around client-side `DELIMITER` directives.
///
/// `DELIMITER` is interpreted by the mysql command-line client, not the server. Text under the
/// default `;` delimiter is sent as one multi-statement batch; each statement under a custom
/// delimiter (trigger and routine bodies) becomes its own batch.
pub fn split_delimiter_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut delimiter = ";".to_string();

    for line in sql.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_delimiter_directive(trimmed) {
            if !current.trim().is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current.clear();
            delimiter = rest.to_string();
            continue;
        }

        if delimiter != ";" && trimmed.ends_with(delimiter.as_str()) {
            let body = &trimmed[..trimmed.len() - delimiter.len()];
            current.push_str(body);
            current.push('\n');
            if !current.trim().is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current);
    }

    batches
}

fn strip_delimiter_directive(line: &str) -> Option<&str> {
    let (head, rest) = line.split_once(char::is_whitespace)?;
    if !head.eq_ignore_ascii_case("DELIMITER") {
        return None;
    }
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

// =============================================================================
// DbConnector: connection checks for the server-connection wizard page
// =============================================================================

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// Safe to show in UI
    pub user_message: String,
    /// For logs only (already masked)
    pub internal_details: String,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<(), ConnectError>;

    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(20)
    }

    fn max_retries(&self) -> u32 {
        3
    }
}

/// Connector that opens (and drops) a real server connection.
pub struct RealDbConnector {
    pub timeout: Duration,
    pub retries: u32,
}

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn connect(&self, connection_string: &str) -> Result<(), ConnectError> {
        match MySqlServerInstance::connect(connection_string, self.timeout).await {
            Ok(instance) => {
                if let Ok(v) = instance.server_version().await {
                    info!("[PHASE: database] [STEP: check_connection] Server version {}", v);
                }
                Ok(())
            }
            Err(e) => Err(ConnectError {
                user_message: "Unable to connect. Verify host, port, credentials, and that the server is running."
                    .to_string(),
                internal_details: format!("Connection error: {:#}", e),
            }),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    fn max_retries(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Check that a connection can be opened, with per-attempt timeout and bounded retries.
pub async fn check_connection<C: DbConnector + ?Sized>(
    connector: &C,
    connection_string: &str,
) -> Result<(), ConnectError> {
    retry_bounded(
        connector.max_retries(),
        connector.timeout_duration(),
        || connector.connect(connection_string),
        || ConnectError {
            user_message: "Connection timed out. Check that the server is running and reachable."
                .to_string(),
            internal_details: format!(
                "Attempt exceeded {}ms",
                connector.timeout_duration().as_millis()
            ),
        },
        |e: &ConnectError| {
            warn!(
                "[PHASE: database] [STEP: check_connection] Attempt failed: {}",
                e.internal_details
            );
            true
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct ImmediateFailureStub {
        user_message: String,
        internal_details: String,
        call_count: AtomicU32,
    }

    impl ImmediateFailureStub {
        fn new(user_message: &str, internal_details: &str) -> Self {
            Self {
                user_message: user_message.to_string(),
                internal_details: internal_details.to_string(),
                call_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DbConnector for ImmediateFailureStub {
        async fn connect(&self, _conn_str: &str) -> Result<(), ConnectError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Err(ConnectError {
                user_message: self.user_message.clone(),
                internal_details: self.internal_details.clone(),
            })
        }

        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(100)
        }
    }

    struct HangingStub {
        call_count: AtomicU32,
    }

    #[async_trait]
    impl DbConnector for HangingStub {
        async fn connect(&self, _conn_str: &str) -> Result<(), ConnectError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }

        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(100)
        }

        fn max_retries(&self) -> u32 {
            1
        }
    }

    struct FailThenSucceedStub {
        failures_before_success: u32,
        call_count: AtomicU32,
    }

    #[async_trait]
    impl DbConnector for FailThenSucceedStub {
        async fn connect(&self, _conn_str: &str) -> Result<(), ConnectError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if count < self.failures_before_success {
                Err(ConnectError {
                    user_message: "Temporary failure, retrying...".to_string(),
                    internal_details: format!("Attempt {} failed", count + 1),
                })
            } else {
                Ok(())
            }
        }

        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn max_retries(&self) -> u32 {
            5
        }
    }

    #[tokio::test]
    async fn connection_timeout_completes_within_budget() {
        let start = Instant::now();
        let stub = HangingStub {
            call_count: AtomicU32::new(0),
        };

        let result = check_connection(&stub, "ignored").await;

        assert!(start.elapsed() < Duration::from_secs(3));
        let err = result.unwrap_err();
        assert!(
            err.user_message.contains("timed out"),
            "User message should mention timeout: {}",
            err.user_message
        );
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn immediate_failure_retries_and_keeps_details_internal() {
        let stub = ImmediateFailureStub::new(
            "Unable to connect. Verify host, port, credentials, and that the server is running.",
            "Access denied for user 'root'@'localhost'",
        );

        let err = check_connection(&stub, "ignored").await.unwrap_err();

        assert!(!err.user_message.contains("Access denied"));
        assert!(err.user_message.contains("Unable to connect"));
        assert!(err.internal_details.contains("Access denied"));
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let stub = FailThenSucceedStub {
            failures_before_success: 2,
            call_count: AtomicU32::new(0),
        };

        assert!(check_connection(&stub, "ignored").await.is_ok());
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 3);
    }

    /// Hangs on the first attempt, succeeds afterwards.
    struct SlowFirstAttemptStub {
        call_count: AtomicU32,
    }

    #[async_trait]
    impl DbConnector for SlowFirstAttemptStub {
        async fn connect(&self, _conn_str: &str) -> Result<(), ConnectError> {
            if self.call_count.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn max_retries(&self) -> u32 {
            2
        }
    }

    #[tokio::test]
    async fn timed_out_attempt_is_retried() {
        let stub = SlowFirstAttemptStub {
            call_count: AtomicU32::new(0),
        };

        assert!(check_connection(&stub, "ignored").await.is_ok());
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_never_exceeds_attempt_budget() {
        let stub = FailThenSucceedStub {
            failures_before_success: 10,
            call_count: AtomicU32::new(0),
        };

        assert!(check_connection(&stub, "ignored").await.is_err());
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn non_transient_connect_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_bounded(
            3,
            Duration::from_millis(100),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("Access denied for user 'root'@'localhost'")) }
            },
            || anyhow::anyhow!("Connection attempt timed out"),
            is_transient_connect_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_connect_error_is_retried_until_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_bounded(
            3,
            Duration::from_millis(100),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("Connection refused (os error 111)")) }
            },
            || anyhow::anyhow!("Connection attempt timed out"),
            is_transient_connect_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_bounded(
            0,
            Duration::from_millis(100),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
            || anyhow::anyhow!("Connection attempt timed out"),
            is_transient_connect_error,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_error_display_is_user_message_only() {
        let err = ConnectError {
            user_message: "Connection refused by server.".to_string(),
            internal_details: "tcp connect failed: errno=111".to_string(),
        };
        assert_eq!(format!("{}", err), "Connection refused by server.");
    }

    #[test]
    fn split_delimiter_batches_plain_script_is_one_batch() {
        let sql = "CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);\n";
        let batches = split_delimiter_batches(sql);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains("INSERT INTO a"));
    }

    #[test]
    fn split_delimiter_batches_splits_trigger_bodies() {
        let sql = "\
CREATE TABLE film (id INT);
DELIMITER ;;
CREATE TRIGGER ins_film AFTER INSERT ON film FOR EACH ROW BEGIN
  INSERT INTO film_text VALUES (new.id);
END;;
CREATE TRIGGER del_film AFTER DELETE ON film FOR EACH ROW BEGIN
  DELETE FROM film_text WHERE id = old.id;
END;;
DELIMITER ;
INSERT INTO film VALUES (1);
";
        let batches = split_delimiter_batches(sql);
        assert_eq!(batches.len(), 4, "{:?}", batches);
        assert!(batches[0].contains("CREATE TABLE film"));
        assert!(batches[1].contains("ins_film"));
        assert!(batches[1].trim_end().ends_with("END"));
        assert!(batches[2].contains("del_film"));
        assert!(batches[3].contains("INSERT INTO film"));
        assert!(batches.iter().all(|b| !b.contains("DELIMITER")));
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(is_transient_connect_error(&anyhow::anyhow!("Connection refused")));
        assert!(!is_transient_connect_error(&anyhow::anyhow!("Access denied")));
    }
}
