pub mod blob_extractor;
pub mod color_filter;
pub mod color_model;
pub mod geometry;
pub mod hsv;
pub mod light_classifier;
pub mod motion_filter;
pub mod particle;
pub mod scratch;
pub mod smoothing;
