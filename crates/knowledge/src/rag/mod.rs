//! Retrieval-augmented answering over the forum corpus.

pub mod context;
pub mod pipeline;
pub mod retriever;
pub mod stream;
pub mod types;

pub use context::assemble_context;
pub use pipeline::{ChatPipeline, ChatRequest, PipelineSettings};
pub use retriever::{clean_query, HybridRetriever, RankRequest, RankingBackend};
pub use stream::{
    decode_stream, encode_sidecar, DecodeEvent, Framing, ResponseEncoder, ResponseStream,
    SidecarDecoder, APOLOGY,
};
pub use types::{CitationMetadata, RetrievedItem, Sidecar, SourceRef};
