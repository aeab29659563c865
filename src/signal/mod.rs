pub mod arbitrator;
pub mod normalizer;

pub use arbitrator::arbitrate;
pub use normalizer::ConfidenceNormalizer;
