//! CRUD operations for principals (users and guests).

use chrono::{DateTime, Utc};
use parley_shared::{Principal, PrincipalId};
use rusqlite::{params, OptionalExtension};

use crate::database::{parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::Account;

impl Database {
    pub fn insert_principal(&self, account: &Account) -> Result<()> {
        let principal = &account.principal;
        self.conn()
            .execute(
                "INSERT INTO principals (id, display_name, is_ephemeral, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    principal.id.to_string(),
                    principal.display_name,
                    principal.is_ephemeral,
                    account.password_hash,
                    account.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("principal '{}'", principal.display_name))
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    pub fn get_principal_by_id(&self, id: PrincipalId) -> Result<Principal> {
        self.conn()
            .query_row(
                "SELECT id, display_name, is_ephemeral, password_hash, created_at
                 FROM principals WHERE id = ?1",
                params![id.to_string()],
                row_to_account,
            )
            .map(|account| account.principal)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("principal"),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn get_account_by_name(&self, display_name: &str) -> Result<Option<Account>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, display_name, is_ephemeral, password_hash, created_at
                 FROM principals WHERE display_name = ?1",
                params![display_name],
                row_to_account,
            )
            .optional()?)
    }

    pub fn list_all_principals(&self) -> Result<Vec<Principal>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, is_ephemeral, password_hash, created_at
             FROM principals ORDER BY display_name ASC",
        )?;

        let rows = stmt.query_map([], row_to_account)?;

        let mut principals = Vec::new();
        for row in rows {
            principals.push(row?.principal);
        }
        Ok(principals)
    }

    /// Ephemeral principals created at or before `created_before`.
    pub fn list_stale_guests(&self, created_before: DateTime<Utc>) -> Result<Vec<PrincipalId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, is_ephemeral, password_hash, created_at
             FROM principals WHERE is_ephemeral = 1",
        )?;

        let rows = stmt.query_map([], row_to_account)?;

        let mut stale = Vec::new();
        for row in rows {
            let account = row?;
            if account.created_at <= created_before {
                stale.push(account.principal.id);
            }
        }
        Ok(stale)
    }

    /// Delete a principal. Memberships cascade; messages keep their
    /// `author_name` snapshot.
    pub fn delete_principal(&self, id: PrincipalId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM principals WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let is_ephemeral: bool = row.get(2)?;
    let password_hash: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(Account {
        principal: Principal {
            id: PrincipalId(parse_uuid(0, &id_str)?),
            display_name,
            is_ephemeral,
            online: false,
        },
        password_hash,
        created_at: parse_ts(4, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use parley_shared::ChannelId;

    #[test]
    fn insert_and_find_account() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = Principal::registered("alice");
        db.create_principal(&Account::with_password(alice.clone(), "hash".into()))
            .unwrap();

        let found = db.find_account("alice").unwrap().unwrap();
        assert_eq!(found.principal, alice);
        assert_eq!(found.password_hash.as_deref(), Some("hash"));
        assert!(db.find_account("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_principal(&Account::guest(Principal::guest("guest_x")))
            .unwrap();
        let err = db
            .create_principal(&Account::guest(Principal::guest("guest_x")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn stale_guests_are_ephemeral_and_old_enough() {
        let mut db = Database::open_in_memory().unwrap();
        let mut old_guest = Account::guest(Principal::guest("guest_old"));
        old_guest.created_at = Utc::now() - chrono::Duration::hours(2);
        let fresh_guest = Account::guest(Principal::guest("guest_new"));
        let mut old_user = Account::with_password(Principal::registered("carol"), "hash".into());
        old_user.created_at = old_guest.created_at;
        for account in [&old_guest, &fresh_guest, &old_user] {
            db.create_principal(account).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(db.stale_guests(cutoff).unwrap(), vec![old_guest.principal.id]);
        assert_eq!(db.stale_guests(Utc::now()).unwrap().len(), 2);
    }

    #[test]
    fn delete_cascades_memberships() {
        let mut db = Database::open_in_memory().unwrap();
        let guest = Principal::guest("guest_y");
        db.create_principal(&Account::guest(guest.clone())).unwrap();
        db.add_membership(&ChannelId::general(), guest.id).unwrap();

        assert!(db.remove_principal(guest.id).unwrap());
        assert!(!db.is_member(&ChannelId::general(), guest.id).unwrap());
        assert!(matches!(
            db.get_principal(guest.id),
            Err(StoreError::NotFound(_))
        ));
    }
}
