//! Parcel Lasso - Headless Driver
//!
//! Loads the comps and pricing row files in the background, feeds every published snapshot to
//! a [`parcel_lasso_lib::Session`], replays a script of drawn regions and filter inputs, and
//! writes the exported sheets as JSON.

mod error;
pub mod loader;
pub mod logging;
pub mod runner;
pub mod settings;

pub use error::AppError;
pub use runner::{RunSummary, run};
pub use settings::Settings;
