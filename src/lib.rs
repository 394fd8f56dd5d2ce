pub mod baseline;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod features;
pub mod field;
pub mod game_record;
pub mod normalize;
pub mod pipeline;
pub mod rows;
pub mod scoring;
pub mod sqlite_store;
pub mod store;
pub mod synthetic;
pub mod validation;
pub mod window;

pub use error::{PipelineError, Result};
