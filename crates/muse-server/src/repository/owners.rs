use chrono::Utc;
use muse_common::Cursor;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{authorize, RepoError, RepoResult, Repository};
use crate::{
    models::{keys, Owner, Principal, Role, Versioned},
    retry::retry_with_backoff,
    table::{Condition, IndexName, Page, QueryRequest, SortRange, StoreError},
};

impl Repository {
    /// Fetch the caller's account, creating it on first access.
    ///
    /// Two first requests racing each other both end up reading the same
    /// record: the loser's conditional create fails and it falls back to a
    /// read.
    #[instrument(skip(self), fields(owner_id = %principal.owner_id))]
    pub async fn get_or_create_owner(
        &self,
        principal: &Principal,
        email: &str,
        display_name: Option<&str>,
    ) -> RepoResult<Versioned<Owner>> {
        let key = keys::owner(&principal.owner_id);
        if let Some(existing) = self.load_opt::<Owner>(&key).await? {
            return Ok(existing);
        }

        if !email.contains('@') {
            return Err(RepoError::validation("email address is malformed"));
        }

        let owner = Owner::new(principal.owner_id, email, display_name);
        match self.save(owner, Condition::NotExists).await {
            Ok(created) => {
                info!("Created owner record");
                Ok(created)
            }
            Err(e) if e.is_condition_failed() => {
                debug!("Owner created concurrently, reading winner");
                self.load(&key).await
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_owner(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
    ) -> RepoResult<Versioned<Owner>> {
        authorize(principal, owner_id)?;
        self.load(&keys::owner(owner_id)).await
    }

    /// Owners whose email starts with `prefix`. Privileged callers only.
    #[instrument(skip(self, cursor))]
    pub async fn find_owners_by_email_prefix(
        &self,
        principal: &Principal,
        prefix: &str,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> RepoResult<Page<Owner>> {
        if !principal.role.is_privileged() {
            return Err(RepoError::Forbidden("owner search requires admin".to_string()));
        }
        let prefix = prefix.trim().to_lowercase();
        let sort = if prefix.is_empty() {
            SortRange::All
        } else {
            SortRange::BeginsWith(prefix)
        };
        self.query_records(
            QueryRequest::new(IndexName::Gsi1, keys::EMAIL_PARTITION)
                .sort(sort)
                .cursor(cursor)
                .limit(limit),
        )
        .await
    }

    /// Change an owner's role, guarded on the role the caller last saw.
    ///
    /// The write is conditioned on the version that was read, so counters
    /// updated concurrently by `record_storage` are never overwritten; a
    /// lost race re-reads and re-checks the expected role.
    #[instrument(skip(self))]
    pub async fn set_owner_role(
        &self,
        principal: &Principal,
        owner_id: &Uuid,
        expected: Role,
        role: Role,
    ) -> RepoResult<Versioned<Owner>> {
        if !principal.role.is_privileged() {
            return Err(RepoError::Forbidden("role changes require admin".to_string()));
        }
        if principal.owner_id == *owner_id && !role.is_privileged() {
            return Err(RepoError::validation("admins cannot demote themselves"));
        }

        let key = &keys::owner(owner_id);
        let outcome = retry_with_backoff(self.retry, "set_owner_role", || async move {
            let current = self.load::<Owner>(key).await?;
            if current.role != expected {
                let stale = StoreError::ConditionFailed {
                    key: key.clone(),
                    reason: format!(
                        "role is {}, expected {}",
                        current.role.as_str(),
                        expected.as_str()
                    ),
                };
                return Ok(Err(stale));
            }
            let mut owner = current.value;
            owner.role = role;
            owner.updated_at = Utc::now();
            self.save(owner, Condition::VersionEquals(current.version))
                .await
                .map(Ok)
        })
        .await?;

        let saved = outcome?;
        info!(from = expected.as_str(), to = role.as_str(), "Owner role changed");
        Ok(saved)
    }

    /// Adjust storage counters with an optimistic read-modify-write.
    #[instrument(skip(self))]
    pub async fn record_storage(
        &self,
        owner_id: &Uuid,
        bytes_delta: i64,
        tracks_delta: i32,
    ) -> RepoResult<Versioned<Owner>> {
        let key = &keys::owner(owner_id);
        retry_with_backoff(self.retry, "record_storage", || async move {
            let current = self.load::<Owner>(key).await?;
            let mut owner = current.value;
            owner.storage_used = owner.storage_used.saturating_add_signed(bytes_delta);
            owner.track_count = owner.track_count.saturating_add_signed(tracks_delta);
            owner.updated_at = Utc::now();
            self.save(owner, Condition::VersionEquals(current.version))
                .await
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{owner_principal, repo};
    use super::*;
    use muse_common::{error::Classify, ErrorKind};

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_stable() {
        let repo = repo();
        let principal = owner_principal();

        let first = repo
            .get_or_create_owner(&principal, "Ada@Example.com", None)
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.display_name, "Ada");

        let second = repo
            .get_or_create_owner(&principal, "ignored@example.com", Some("Other"))
            .await
            .unwrap();
        assert_eq!(second.value, first.value);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_converges() {
        let repo = repo();
        let principal = owner_principal();

        let (a, b) = tokio::join!(
            repo.get_or_create_owner(&principal, "a@example.com", None),
            repo.get_or_create_owner(&principal, "a@example.com", None),
        );
        assert_eq!(a.unwrap().value.id, b.unwrap().value.id);
    }

    #[tokio::test]
    async fn test_email_prefix_search() {
        let repo = repo();
        for email in ["alice@x.io", "alex@x.io", "bob@x.io"] {
            repo.get_or_create_owner(&owner_principal(), email, None)
                .await
                .unwrap();
        }
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);

        let page = repo
            .find_owners_by_email_prefix(&admin, "AL", None, 10)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|o| o.email.starts_with("al")));

        let err = repo
            .find_owners_by_email_prefix(&owner_principal(), "al", None, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_role_change_is_guarded_on_expected_role() {
        let repo = repo();
        let member = owner_principal();
        repo.get_or_create_owner(&member, "m@x.io", None).await.unwrap();
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);

        let updated = repo
            .set_owner_role(&admin, &member.owner_id, Role::Subscriber, Role::Artist)
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Artist);

        // Stale expectation loses
        let err = repo
            .set_owner_role(&admin, &member.owner_id, Role::Subscriber, Role::Guest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = repo
            .set_owner_role(&member, &member.owner_id, Role::Artist, Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_role_change_keeps_concurrent_storage_updates() {
        let repo = repo();
        let member = owner_principal();
        repo.get_or_create_owner(&member, "r@x.io", None).await.unwrap();
        let admin = Principal::new(Uuid::new_v4(), Role::Admin);

        let storage = (0..5).map(|_| repo.record_storage(&member.owner_id, 10, 1));
        let (role, storage) = tokio::join!(
            repo.set_owner_role(&admin, &member.owner_id, Role::Subscriber, Role::Artist),
            futures::future::join_all(storage),
        );
        role.unwrap();
        for result in storage {
            result.unwrap();
        }

        let owner = repo.get_owner(&admin, &member.owner_id).await.unwrap();
        assert_eq!(owner.role, Role::Artist);
        assert_eq!(owner.storage_used, 50);
        assert_eq!(owner.track_count, 5);
    }

    #[tokio::test]
    async fn test_record_storage_concurrent_updates_all_land() {
        let repo = repo();
        let principal = owner_principal();
        repo.get_or_create_owner(&principal, "s@x.io", None).await.unwrap();

        let updates = (0..5).map(|_| repo.record_storage(&principal.owner_id, 100, 1));
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        let owner = repo.get_owner(&principal, &principal.owner_id).await.unwrap();
        assert_eq!(owner.storage_used, 500);
        assert_eq!(owner.track_count, 5);
    }
}
