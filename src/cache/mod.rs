//! Decoded-image cache

pub mod image;

pub use image::{BoundedImageCache, CacheError, CacheStats};
