//! Core engine for a wearable heads-up display: a thread-safe fusion store
//! fed by independently scheduled sensor producers, RF-environment
//! analytics on top of it, and the layout primitives the drawing layer
//! consumes.
//!
//! The camera capture driver and the raster drawing layer are external
//! collaborators; this crate produces the per-frame package (snapshot,
//! heading resolution, stack layouts, rotation window) they render from.

pub mod calibration;
pub mod config;
pub mod error;
pub mod layout;
pub mod palette;
pub mod producers;
pub mod rf_model;
pub mod service_manager;
pub mod state;

pub use config::HudConfig;
pub use error::{HudError, ProducerError};
pub use service_manager::ServiceManager;
pub use state::{SharedState, Snapshot};
