pub mod attendance;
pub mod role;
pub mod session;
pub mod settings;
pub mod user;
