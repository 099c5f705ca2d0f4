//! Response middleware.

pub(crate) mod cache;
