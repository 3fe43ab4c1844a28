pub mod attendance_key;
pub mod attendance_service;
pub mod error;
pub mod retry;
