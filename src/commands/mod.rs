pub mod records;
pub mod resolve;
pub mod utils;

#[cfg(test)]
#[path = "../commands_test.rs"]
mod commands_test;
