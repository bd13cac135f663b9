pub mod agent;
pub mod classifier;
pub mod llm;
pub mod prompt;
pub mod retriever;
pub mod stats_tool;
pub mod vector_store;
