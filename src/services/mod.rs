pub mod completion_client;
pub mod vector_client;
