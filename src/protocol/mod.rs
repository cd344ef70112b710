pub mod client;
pub mod messages;
pub mod scanner;
