//! CLI command implementations.

pub mod login;
pub mod logout;
pub mod oauth;
pub mod timeline;
pub mod whoami;
