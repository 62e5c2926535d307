pub mod booking;
pub mod crm;
pub mod message;
pub mod session;
pub mod slot;
