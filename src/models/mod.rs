pub mod booking;
pub mod challenge;
pub mod driver;
pub mod user;
