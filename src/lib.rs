//! Client for the hot-work permit inspection workflow: photo compression,
//! bounded and retrying uploads, form submission and record queries.

pub mod commands;
pub mod config;
pub mod errors;
pub mod forms;
pub mod image_processor;
pub mod records;
pub mod security;
pub mod uploader;
