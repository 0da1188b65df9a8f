//! Various utilities

pub mod deferred_delete;

pub(crate) mod hash;
