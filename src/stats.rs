use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::db::get_stats;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_grades: i64,
    pub total_sections: i64,
    pub total_schedules: i64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Dashboard counters shared by every admin mutation. Mutations call
/// [`StatsBoard::notify`] once they have completed.
#[derive(Default)]
pub struct StatsBoard {
    current: RwLock<Option<Stats>>,
}

impl StatsBoard {
    pub async fn snapshot(&self) -> Option<Stats> {
        self.current.read().await.clone()
    }

    #[instrument(skip_all)]
    pub async fn refresh(&self, pool: &Pool<Sqlite>) -> Result<Stats, AppError> {
        let stats = get_stats(pool).await?;
        *self.current.write().await = Some(stats.clone());
        Ok(stats)
    }

    pub async fn current_or_refresh(&self, pool: &Pool<Sqlite>) -> Result<Stats, AppError> {
        match self.snapshot().await {
            Some(stats) => Ok(stats),
            None => self.refresh(pool).await,
        }
    }

    /// Refresh after a mutation. A failed refresh only leaves the board stale.
    pub async fn notify(&self, pool: &Pool<Sqlite>) {
        if let Err(err) = self.refresh(pool).await {
            err.log_and_record("Refreshing statistics after mutation");
        }
    }
}
