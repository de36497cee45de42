pub mod config;
pub mod credentials;
pub mod export;
pub mod generation;
pub mod lineage;
pub mod model;
pub mod persistence;
pub mod request;
pub mod runtime;
pub mod selection;
pub mod server;
pub mod session;
pub mod studio;
#[doc(hidden)]
pub mod test_support;
pub mod thumbnail;
