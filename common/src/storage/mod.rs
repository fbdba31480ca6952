pub mod db;
pub mod surreal_store;
pub mod types;
pub mod vector_store;
