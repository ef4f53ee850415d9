use std::fmt;
use std::str::FromStr;

use sqlx::FromRow;

use crate::database::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Maintainer,
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Maintainer => "maintainer",
            Role::Observer => "observer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "maintainer" => Ok(Role::Maintainer),
            "observer" => Ok(Role::Observer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub global_role: String,
}

impl User {
    /// Role of the user; an unrecognized stored value grants nothing.
    pub fn role(&self) -> Option<Role> {
        self.global_role.parse().ok()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub async fn create(
        name: &str,
        email: &str,
        role: Role,
        db: &Database,
    ) -> Result<User, sqlx::Error> {
        let id = sqlx::query("INSERT INTO users (name, email, global_role) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(email)
            .bind(role.as_str())
            .execute(&**db)
            .await?
            .last_insert_rowid();

        sqlx::query_as::<_, User>("SELECT id, name, email, global_role FROM users WHERE id = ?1")
            .bind(id)
            .fetch_one(&**db)
            .await
    }
}

pub struct Session;

impl Session {
    pub async fn create(user_id: i64, token: &str, db: &Database) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES (?1, ?2)")
            .bind(token)
            .bind(user_id)
            .execute(&**db)
            .await?;
        Ok(())
    }

    /// Resolve a session token to its user.
    pub async fn user(token: &str, db: &Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.name, u.email, u.global_role
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&**db)
        .await
    }
}
