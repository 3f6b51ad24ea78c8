pub mod booking;
pub mod notify;
pub mod qr;
pub mod queries;
pub mod schedule;
