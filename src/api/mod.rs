pub mod admin;
pub mod attendance;
pub mod face;
pub mod faculty;
pub mod sessions;
pub mod student;
