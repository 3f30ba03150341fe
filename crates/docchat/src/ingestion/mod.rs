//! Document ingestion: multi-format extraction, chunking, and the build pipeline

mod chunker;
mod email;
mod parser;
mod pipeline;
mod tabular;

pub use chunker::TextChunker;
pub use parser::FileParser;
pub use pipeline::{BuildReport, ExtractionFailure, IngestPipeline, IngestProgress, LoadReport};
