//! HTTP routes of the server.
//!
use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::{
    controller::Controller,
    endpoints::{self, StreamConfig},
};

/// Build the router serving the control panel, the control endpoints and the video feed.
pub fn router(controller: Arc<Controller>, stream_config: StreamConfig) -> Router {
    let store = Arc::clone(controller.store());

    Router::new()
        .route("/", get(endpoints::index))
        .route("/healthcheck", get(endpoints::healthcheck))
        .route("/video_feed", get(endpoints::video_feed))
        .route("/start", get(endpoints::start))
        .route("/stop", get(endpoints::stop))
        .route("/detection", get(endpoints::detection))
        .route("/status", get(endpoints::status))
        .layer(Extension(controller))
        .layer(Extension(store))
        .layer(Extension(stream_config))
}
