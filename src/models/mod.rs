//! Domain model module declarations.

pub mod event;
pub mod message;
pub mod notification;
pub mod operation;
pub mod session;
