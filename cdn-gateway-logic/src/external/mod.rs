//! Clients for the external services the workers write to: the CDN
//! metadata table and the edge-cache purge API. Each is behind a trait so
//! tests substitute fakes.

pub mod autoindex;
pub mod batch;
pub mod dynamodb;
pub mod purge;
