//! ABOUTME: Wire chunk vocabulary and the stream event converter

pub mod converter;

pub use converter::{Chunk, StreamEventConverter};
