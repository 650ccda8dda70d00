pub mod application;
pub mod intent;
pub mod payload;
pub mod profile;
pub mod session;
pub mod task;
