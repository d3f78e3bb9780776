pub mod analyzer;
pub mod gemini;
pub mod prompt;
pub mod schema;

pub use analyzer::VisionAnalyzer;
pub use gemini::{ImageInput, VisionModel};
pub use schema::{AnalysisStatus, VisionResult};
