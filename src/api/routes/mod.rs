pub mod jobs;
pub mod recordings;
pub mod session;
