pub mod background_model;
pub mod body_blob;
pub mod body_extractor;
pub mod location_estimator;
pub mod occupancy;
pub mod presence_filter;
pub mod thermal_frame;
pub mod tracker;
