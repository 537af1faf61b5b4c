//! Database row types; these map directly to SQLite rows.
//! Distinct from vidtube-types API models so secrets stay in this layer.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub fullname: String,
    /// Argon2 PHC string.
    pub password: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub fullname: &'a str,
    pub password_hash: &'a str,
    pub avatar: &'a str,
    pub cover_image: Option<&'a str>,
}

/// Partial update of a user row. `None` leaves a column untouched;
/// `refresh_token: Some(None)` clears the stored token.
#[derive(Debug, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub fullname: Option<String>,
    pub password_hash: Option<String>,
    pub avatar: Option<String>,
    pub cover_image: Option<String>,
    pub refresh_token: Option<Option<String>>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.fullname.is_none()
            && self.password_hash.is_none()
            && self.avatar.is_none()
            && self.cover_image.is_none()
            && self.refresh_token.is_none()
    }
}
