pub mod entities;
pub mod parser;
pub mod service;
