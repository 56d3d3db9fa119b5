//! Read-only view of the daily duty roster.

use chrono::NaiveDate;
use tracing::{instrument, warn};

use crate::{base::types::Res, service::db::DbClient};

/// Answers whether a person is scheduled in a division on a given day.
#[derive(Clone)]
pub struct DutyRoster {
    db: DbClient,
}

impl DutyRoster {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    /// Strict lookup; a division without a published roster has nobody working.
    pub async fn try_is_working(&self, person: &str, division: &str, day: NaiveDate) -> Res<bool> {
        let roster = self.db.get_roster(division, day).await?;

        Ok(roster.is_some_and(|names| names.iter().any(|n| n == person)))
    }

    /// Lookup that never fails: store errors count as "working".
    ///
    /// The roster only decides whether an informational notice is sent, so an
    /// unreachable roster must not hold up the caller.
    #[instrument(skip(self))]
    pub async fn is_working(&self, person: &str, division: &str, day: NaiveDate) -> bool {
        match self.try_is_working(person, division, day).await {
            Ok(working) => working,
            Err(err) => {
                warn!("Roster lookup failed, assuming `{}` is working: {}", person, err);
                true
            }
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn looks_up_names_in_the_days_roster() {
        let db = DbClient::surreal_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        db.set_roster("support", day, &["Alice Duty".to_string()]).await.unwrap();

        let roster = DutyRoster::new(db);

        assert!(roster.is_working("Alice Duty", "support", day).await);
        assert!(!roster.is_working("Bob Duty", "support", day).await);
        assert!(!roster.is_working("Alice Duty", "support", day.succ_opt().unwrap()).await);
        assert!(!roster.is_working("Alice Duty", "sales", day).await);
    }
}
