pub mod accounts;
pub mod library;
pub mod notice;
pub mod publish;
pub mod session;
pub mod state;
