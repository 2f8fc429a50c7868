//! Account lookups and admin-side account maintenance.

use sqlx::MySqlPool;
use tracing::info;

use crate::auth::password::hash_password;
use crate::error::{AppError, is_duplicate_key};
use crate::model::role::Role;
use crate::model::user::{USER_COLUMNS, User};
use crate::utils::db_utils::{SqlValue, UpdateBuilder, execute_update};

pub async fn find_by_id(pool: &MySqlPool, id: u64) -> Result<Option<User>, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(pool).await
}

pub async fn find_by_email(pool: &MySqlPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    sqlx::query_as::<_, User>(&sql)
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await
}

pub async fn require_user(pool: &MySqlPool, id: u64) -> Result<User, AppError> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

pub async fn list_by_role(pool: &MySqlPool, role: Role) -> Result<Vec<User>, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE role = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, User>(&sql).bind(role.as_ref()).fetch_all(pool).await
}

#[derive(Debug)]
pub struct NewUser<'a> {
    pub role: Role,
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub class_name: Option<&'a str>,
    pub roll_no: Option<&'a str>,
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|v| !v.is_empty())
}

fn hash(password: &str) -> Result<String, AppError> {
    hash_password(password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        AppError::Internal
    })
}

/// `users.email` is the only unique key besides the id.
fn email_conflict(e: sqlx::Error) -> AppError {
    if is_duplicate_key(&e) {
        AppError::Conflict("Email already exists".into())
    } else {
        e.into()
    }
}

/// Inserts the account and returns it. A taken email is a 409.
pub async fn create_user(pool: &MySqlPool, new: NewUser<'_>) -> Result<User, AppError> {
    let email = new.email.trim().to_lowercase();
    let hashed = hash(new.password)?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (role, name, email, password, class_name, roll_no)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.role.as_ref())
    .bind(new.name.trim())
    .bind(&email)
    .bind(hashed)
    .bind(non_blank(new.class_name))
    .bind(non_blank(new.roll_no))
    .execute(pool)
    .await;

    let id = result.map_err(email_conflict)?.last_insert_id();

    info!(user_id = id, role = %new.role, "User created");
    require_user(pool, id).await
}

#[derive(Debug, Default)]
pub struct UserChanges<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub password: Option<&'a str>,
    pub class_name: Option<&'a str>,
    pub roll_no: Option<&'a str>,
}

/// Applies the provided, non-blank fields to the account with this id and
/// role. Returns the updated row, or 404 when no such account exists.
pub async fn update_user(
    pool: &MySqlPool,
    id: u64,
    role: Role,
    changes: UserChanges<'_>,
) -> Result<User, AppError> {
    let existing = match find_by_id(pool, id).await? {
        Some(u) if u.role() == Some(role) => u,
        _ => return Err(AppError::not_found(format!("{} not found", role_label(role)))),
    };

    let mut update = UpdateBuilder::new();
    update.set_text("name", changes.name);

    if let Some(email) = non_blank(changes.email).map(str::to_lowercase) {
        if email != existing.email {
            if find_by_email(pool, &email).await?.is_some() {
                return Err(AppError::Conflict("Email already exists".into()));
            }
            update.set("email", SqlValue::String(email));
        }
    }

    if let Some(password) = non_blank(changes.password) {
        update.set("password", SqlValue::String(hash(password)?));
    }

    if role == Role::Student {
        update
            .set_text("class_name", changes.class_name)
            .set_text("roll_no", changes.roll_no);
    }

    let where_values = vec![SqlValue::U64(id), SqlValue::String(role.to_string())];
    if let Some(sql) = update.build("users", "id = ? AND role = ?", where_values) {
        // Also covers losing a race with another account taking the email.
        execute_update(pool, sql).await.map_err(email_conflict)?;
        info!(user_id = id, "User updated");
    }

    require_user(pool, id).await
}

pub async fn delete_user(pool: &MySqlPool, id: u64, role: Role) -> Result<(), AppError> {
    let done = sqlx::query("DELETE FROM users WHERE id = ? AND role = ?")
        .bind(id)
        .bind(role.as_ref())
        .execute(pool)
        .await?;

    if done.rows_affected() == 0 {
        return Err(AppError::not_found(format!("{} not found", role_label(role))));
    }
    info!(user_id = id, role = %role, "User deleted");
    Ok(())
}

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::Admin => "Admin",
        Role::Faculty => "Faculty",
        Role::Student => "Student",
    }
}
