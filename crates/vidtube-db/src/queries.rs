use crate::models::{NewUser, UserRow, UserUpdate};
use crate::{Database, UniqueViolation};
use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, Row};

const USER_COLUMNS: &str = "id, username, email, fullname, password, avatar, cover_image, \
                            refresh_token, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user and read it back. Fails with `UniqueViolation` when the
    /// username or email is already taken.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, fullname, password, avatar, cover_image)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id,
                    user.username,
                    user.email,
                    user.fullname,
                    user.password_hash,
                    user.avatar,
                    user.cover_image,
                ],
            )
            .map_err(map_unique)?;

            query_user_by_id(conn, user.id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished after insert", user.id))
        })
    }

    /// True when any user already holds `username` or `email`.
    pub fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
                (username, email),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Look a user up by username, email, or both (either may match).
    pub fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRow>> {
        if username.is_none() && email.is_none() {
            return Ok(None);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?2 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row((username, email), user_from_row).optional()
        })
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Apply a partial update and return the fresh row, or `None` if no user
    /// has this id. Email collisions surface as `UniqueViolation`.
    pub fn update_fields(&self, id: &str, update: &UserUpdate) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            if update.is_empty() {
                return query_user_by_id(conn, id);
            }

            let mut sets: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(email) = &update.email {
                sets.push("email = ?");
                values.push(Value::Text(email.clone()));
            }
            if let Some(fullname) = &update.fullname {
                sets.push("fullname = ?");
                values.push(Value::Text(fullname.clone()));
            }
            if let Some(hash) = &update.password_hash {
                sets.push("password = ?");
                values.push(Value::Text(hash.clone()));
            }
            if let Some(avatar) = &update.avatar {
                sets.push("avatar = ?");
                values.push(Value::Text(avatar.clone()));
            }
            if let Some(cover) = &update.cover_image {
                sets.push("cover_image = ?");
                values.push(Value::Text(cover.clone()));
            }
            if let Some(token) = &update.refresh_token {
                sets.push("refresh_token = ?");
                values.push(match token {
                    Some(t) => Value::Text(t.clone()),
                    None => Value::Null,
                });
            }
            values.push(Value::Text(id.to_string()));

            let sql = format!(
                "UPDATE users SET {}, updated_at = datetime('now') WHERE id = ?",
                sets.join(", ")
            );
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(map_unique)?;

            if changed == 0 {
                return Ok(None);
            }
            query_user_by_id(conn, id)
        })
    }

    /// Swap the stored refresh token only if it still equals `expected`.
    /// Returns false when another request rotated or cleared it first.
    pub fn rotate_refresh_token(&self, id: &str, expected: &str, new_token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND refresh_token = ?3",
                (new_token, id, expected),
            )?;
            Ok(changed == 1)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([id], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        fullname: row.get(3)?,
        password: row.get(4)?,
        avatar: row.get(5)?,
        cover_image: row.get(6)?,
        refresh_token: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_unique(err: rusqlite::Error) -> anyhow::Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            UniqueViolation.into()
        }
        _ => err.into(),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn insert(db: &Database, username: &str, email: &str) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        db.create_user(&NewUser {
            id: &id,
            username,
            email,
            fullname: "Test User",
            password_hash: "$argon2id$stub",
            avatar: "https://cdn.test/avatar.png",
            cover_image: None,
        })
    }

    #[test]
    fn create_and_find() {
        let db = Database::open_in_memory().unwrap();
        let row = insert(&db, "ana", "ana@x.com").unwrap();

        assert_eq!(row.username, "ana");
        assert!(row.refresh_token.is_none());
        assert!(row.cover_image.is_none());

        let by_id = db.find_by_id(&row.id).unwrap().unwrap();
        assert_eq!(by_id.email, "ana@x.com");

        let by_email = db.find_by_identity(None, Some("ana@x.com")).unwrap().unwrap();
        assert_eq!(by_email.id, row.id);

        let by_name = db.find_by_identity(Some("ana"), None).unwrap().unwrap();
        assert_eq!(by_name.id, row.id);

        assert!(db.find_by_identity(Some("bob"), Some("bob@x.com")).unwrap().is_none());
        assert!(db.find_by_identity(None, None).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_or_email_is_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "ana", "ana@x.com").unwrap();

        let err = insert(&db, "ana", "other@x.com").unwrap_err();
        assert!(err.is::<UniqueViolation>());

        let err = insert(&db, "other", "ana@x.com").unwrap_err();
        assert!(err.is::<UniqueViolation>());

        let count: i64 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn user_exists_checks_either_field() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.user_exists("ana", "ana@x.com").unwrap());

        insert(&db, "ana", "ana@x.com").unwrap();
        assert!(db.user_exists("ana", "new@x.com").unwrap());
        assert!(db.user_exists("new", "ana@x.com").unwrap());
        assert!(!db.user_exists("new", "new@x.com").unwrap());
    }

    #[test]
    fn update_fields_partial() {
        let db = Database::open_in_memory().unwrap();
        let row = insert(&db, "ana", "ana@x.com").unwrap();

        let updated = db
            .update_fields(
                &row.id,
                &UserUpdate {
                    avatar: Some("https://cdn.test/new.png".into()),
                    refresh_token: Some(Some("tok".into())),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.avatar, "https://cdn.test/new.png");
        assert_eq!(updated.refresh_token.as_deref(), Some("tok"));
        assert_eq!(updated.fullname, row.fullname);

        let cleared = db
            .update_fields(
                &row.id,
                &UserUpdate {
                    refresh_token: Some(None),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(cleared.refresh_token.is_none());
        assert_eq!(cleared.avatar, "https://cdn.test/new.png");

        let missing = db
            .update_fields("no-such-id", &UserUpdate { fullname: Some("x".into()), ..Default::default() })
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn update_email_collision() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "ana", "ana@x.com").unwrap();
        let bob = insert(&db, "bob", "bob@x.com").unwrap();

        let err = db
            .update_fields(&bob.id, &UserUpdate { email: Some("ana@x.com".into()), ..Default::default() })
            .unwrap_err();
        assert!(err.is::<UniqueViolation>());
    }

    #[test]
    fn rotate_requires_current_token() {
        let db = Database::open_in_memory().unwrap();
        let row = insert(&db, "ana", "ana@x.com").unwrap();

        // Nothing stored yet
        assert!(!db.rotate_refresh_token(&row.id, "t1", "t2").unwrap());

        db.update_fields(&row.id, &UserUpdate { refresh_token: Some(Some("t1".into())), ..Default::default() })
            .unwrap();

        assert!(db.rotate_refresh_token(&row.id, "t1", "t2").unwrap());
        // Superseded token loses the race
        assert!(!db.rotate_refresh_token(&row.id, "t1", "t3").unwrap());

        let stored = db.find_by_id(&row.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("t2"));
    }
}
