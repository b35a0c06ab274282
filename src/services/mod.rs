//! Storage backends and the upload core built on top of them.

pub mod chunk_writer;
pub mod cleanup;
pub mod local_store;
pub mod memory_store;
pub mod merge_engine;
pub mod object_store;
pub mod resolver;
pub mod upload_service;

#[cfg(test)]
pub(crate) mod testing;
