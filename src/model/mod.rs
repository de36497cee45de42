pub mod advisor;
pub mod client;
