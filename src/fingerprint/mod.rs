pub mod tokenizer;
pub mod normalizer;
pub mod engine;
pub mod registry;

pub use tokenizer::{tokenize, Tokenizer};
pub use normalizer::normalize;
pub use engine::{combined_fingerprint, content_fingerprint, FingerprintEngine, Identification};
pub use registry::{Registration, SignatureEntry, SignatureMatch, SignatureRegistry};
