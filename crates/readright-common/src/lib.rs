pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod rewrite;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
