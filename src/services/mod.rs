pub mod attendance;
pub mod face_enrollment;
pub mod users;
