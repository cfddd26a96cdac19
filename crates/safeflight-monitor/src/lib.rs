//! Flight safety monitor service: JSON-lines vehicle bridge around the
//! safeflight-core flight manager.

pub mod config;
pub mod ingest;
pub mod link;
pub mod loops;
pub mod state;
