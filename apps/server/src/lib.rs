pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod records;
pub mod sanity;
pub mod settings;
pub mod shutdown;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod trust;
pub mod validation;

#[cfg(test)]
mod test_support;
