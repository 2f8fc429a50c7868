use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::types::Json;
use utoipa::ToSchema;

use crate::face::ModelEmbeddings;
use crate::model::role::Role;

/// Full `users` row. Carries the password hash and embeddings, so it is
/// never serialized directly; use [`UserResponse`].
#[derive(Debug, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub role: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub class_name: Option<String>,
    pub roll_no: Option<String>,
    pub face_registered: bool,
    pub face_embeddings: Option<Json<ModelEmbeddings>>,
    pub face_image_url: Option<String>,
    pub face_registered_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

pub const USER_COLUMNS: &str = "id, role, name, email, password, class_name, roll_no, \
     face_registered, face_embeddings, face_image_url, face_registered_at, created_at";

impl User {
    pub fn role(&self) -> Option<Role> {
        Role::from_db(&self.role)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": 7,
    "role": "student",
    "name": "Asha Rao",
    "email": "asha@example.edu",
    "class": "CSE-A",
    "rollNo": "21CS042",
    "faceRegistered": true,
    "faceImageUrl": null,
    "faceRegisteredAt": "2026-01-12T09:30:00",
    "createdAt": "2026-01-01T08:00:00"
}))]
pub struct UserResponse {
    pub id: u64,
    pub role: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub roll_no: Option<String>,
    pub face_registered: bool,
    pub face_image_url: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub face_registered_at: Option<NaiveDateTime>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            role: u.role,
            name: u.name,
            email: u.email,
            class_name: u.class_name,
            roll_no: u.roll_no,
            face_registered: u.face_registered,
            face_image_url: u.face_image_url,
            face_registered_at: u.face_registered_at,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
pub fn sample_user(id: u64, role: Role) -> User {
    User {
        id,
        role: role.to_string(),
        name: format!("User {id}"),
        email: format!("user{id}@example.edu"),
        password: "$argon2id$hash".into(),
        class_name: Some("CSE-A".into()),
        roll_no: None,
        face_registered: true,
        face_embeddings: Some(Json(ModelEmbeddings::from([(
            "Facenet512".to_string(),
            vec![1.0, 0.0],
        )]))),
        face_image_url: None,
        face_registered_at: None,
        created_at: chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_hides_credentials_and_embeddings() {
        let json = serde_json::to_value(UserResponse::from(sample_user(3, Role::Student))).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("password"));
        assert!(!obj.contains_key("faceEmbeddings"));
        assert_eq!(obj["class"], "CSE-A");
        assert_eq!(obj["faceRegistered"], true);
    }
}
