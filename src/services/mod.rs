//! Core upload pipeline: hashing, storage backends, dedup, task tracking
//! and the orchestrating `UploadService`.

pub mod backends;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod record_store;
pub mod staging;
pub mod storage_backend;
pub mod upload_service;
pub mod upload_tracker;
