use std::sync::Arc;

use crate::dao::{
    backend::{Filter, Query, TableStore},
    models::{NewProfile, Profile, SubjectId},
    rows::{from_rows, to_row},
    storage::StorageResult,
};

/// Remote table holding application profiles.
pub const PROFILE_TABLE: &str = "users";

/// Data Access Object for profile rows, keyed by auth subject.
#[derive(Clone)]
pub struct ProfileRepository {
    tables: Arc<dyn TableStore>,
}

impl ProfileRepository {
    /// Repository over `tables`.
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self { tables }
    }

    /// Profile row for `subject`, if one exists.
    pub async fn find_by_subject(&self, subject: SubjectId) -> StorageResult<Option<Profile>> {
        let rows = self
            .tables
            .select(
                PROFILE_TABLE,
                Query::new()
                    .filter(Filter::eq("auth_user_id", subject.to_string()))
                    .limit(1),
            )
            .await?;
        Ok(from_rows(PROFILE_TABLE, rows)?.into_iter().next())
    }

    /// Profiles for every subject in `subjects`, in no particular order.
    pub async fn find_many(&self, subjects: &[SubjectId]) -> StorageResult<Vec<Profile>> {
        if subjects.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .tables
            .select(
                PROFILE_TABLE,
                Query::new().filter(Filter::any_of(
                    "auth_user_id",
                    subjects.iter().map(SubjectId::to_string),
                )),
            )
            .await?;
        from_rows(PROFILE_TABLE, rows)
    }

    /// Insert a profile and return it as stored, when the store echoes it back.
    pub async fn insert(&self, profile: &NewProfile) -> StorageResult<Option<Profile>> {
        let rows = self
            .tables
            .insert(PROFILE_TABLE, vec![to_row(PROFILE_TABLE, profile)?])
            .await?;
        Ok(from_rows(PROFILE_TABLE, rows)?.into_iter().next())
    }
}
