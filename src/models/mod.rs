pub mod diagnosis;
pub mod job;
