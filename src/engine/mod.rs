pub mod accounts;
pub mod drivers;
pub mod lifecycle;
pub mod otp;
pub mod trip_start;

#[cfg(test)]
mod tests;
