pub mod codec;
pub mod entities;
pub mod retry;
pub mod service;
