//! Storage and image-processing services behind the HTTP handlers.

pub mod blob_store;
pub mod hasher;
pub mod image_codec;
pub mod metadata_store;
pub mod photo_service;
