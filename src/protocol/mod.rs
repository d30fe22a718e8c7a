//! Wire protocol: length-prefixed frames carrying JSON requests and responses.

pub mod frame;
pub mod request;
pub mod response;
