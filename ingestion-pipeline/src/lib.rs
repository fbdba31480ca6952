#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

//! Document registration: extraction, embedding and transactional storage for a
//! named retrieval configuration.

pub mod extraction;
pub mod pipeline;

pub use extraction::{ExtractionHandler, ExtractorRegistry};
pub use pipeline::{
    DefaultRegistrationServices, RegistrationPipeline, RegistrationReport, RegistrationRequest,
    RegistrationServices,
};
