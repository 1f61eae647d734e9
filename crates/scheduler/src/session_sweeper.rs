use chrono::{DateTime, Utc};
use rolodex_core::{Error, Result};
use rolodex_storage::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Shortest accepted sweep period; tokio's interval timer rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically removes expired sessions from the database.
pub struct SessionSweeper {
    db: Arc<dyn Database>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            interval: Duration::from_secs(5 * 60), // 5 minutes
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass: drop every session that expired before `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.expire_sessions(now))
            .await
            .map_err(|e| Error::StorageUnavailable(format!("Sweep task failed: {}", e)))?
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "SessionSweeper started");

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(0) => debug!("No expired sessions"),
                        Ok(removed) => info!(removed, "Expired sessions removed"),
                        Err(e) => error!(error = %e, "Session sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("SessionSweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex_storage::{CredentialHasher, MemoryDatabase};

    fn db() -> Arc<dyn Database> {
        Arc::new(MemoryDatabase::new(CredentialHasher::weak()))
    }

    #[tokio::test]
    async fn test_sweep_once_removes_expired() {
        let db = db();
        let short = db.issue_session("a", Duration::from_secs(0)).unwrap();
        let long = db.issue_session("b", Duration::from_secs(3600)).unwrap();

        let sweeper = SessionSweeper::new(db.clone());
        let removed = sweeper
            .sweep_once(short.valid_until + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.find_session(&short.token).unwrap_err().is_not_found());
        assert_eq!(db.find_session(&long.token).unwrap(), long);
    }

    #[tokio::test]
    async fn test_sweep_error_reported() {
        let db = db();
        db.close().unwrap();
        let sweeper = SessionSweeper::new(db);
        let err = sweeper.sweep_once(Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_run_loop_sweeps_and_stops() {
        let db = db();
        let expired = db.issue_session("a", Duration::from_secs(0)).unwrap();
        let live = db.issue_session("b", Duration::from_secs(3600)).unwrap();

        let sweeper = Arc::new(SessionSweeper::new(db.clone()).with_interval(Duration::from_millis(10)));
        assert_eq!(sweeper.interval(), Duration::from_millis(10));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run_loop(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(db.find_session(&expired.token).is_err());
        assert!(db.find_session(&live.token).is_ok());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_survives_failures() {
        let db = db();
        db.close().unwrap();
        let sweeper = Arc::new(SessionSweeper::new(db).with_interval(Duration::from_millis(5)));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run_loop(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_clamped() {
        let db = db();
        let expired = db.issue_session("a", Duration::from_secs(0)).unwrap();

        let sweeper = Arc::new(SessionSweeper::new(db.clone()).with_interval(Duration::ZERO));
        assert_eq!(sweeper.interval(), MIN_INTERVAL);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(sweeper.run_loop(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(db.find_session(&expired.token).is_err());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
