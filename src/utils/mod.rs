//! Generic helpers shared across modules that don't belong to any one
//! domain (audio format conversion, resampling).

pub mod audio;
