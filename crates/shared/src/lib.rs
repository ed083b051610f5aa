//! circlevault shared library: ids, domain enums, and the caller-visible error
//! type shared by the crypto engine and the server.

pub mod constants;
pub mod error;
pub mod ids;
pub mod model;
