mod tracking_service;
mod tracking_service_tests;

pub use tracking_service::{
    RecordPositionRequest, TrackingService, TrackingServiceDependencies, TrackingSettings,
};
