pub mod embedding_vector;
pub mod extracted_document;
pub mod extraction_configuration;
pub mod retrieval_configuration;
pub mod vector_record;

pub use embedding_vector::EmbeddingVector;
pub use extracted_document::{ExtractedChunk, ExtractedDocument};
pub use extraction_configuration::ExtractionConfiguration;
pub use retrieval_configuration::RetrievalConfiguration;
pub use vector_record::{RecordDraft, VectorRecord};
