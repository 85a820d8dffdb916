//! Concurrency primitives shared by the library and its archives

mod async_init;

pub use async_init::AsyncInit;
