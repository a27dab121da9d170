//! facelens-core: face detection, recognition and gallery management.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime on CPU. Detector boxes and recognizer hits are
//! produced independently and merged by [`correlator::correlate`].

pub mod alignment;
pub mod batch;
pub mod correlator;
pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod imageio;
pub mod index;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod recognizer;
pub mod render;
pub mod types;

pub use detector::{DetectBackend, DetectorAdapter, FaceDetector};
pub use enroll::{enroll_face, EnrollError};
pub use gallery::{Gallery, Identity};
pub use matcher::EmbeddingMatcher;
pub use models::{default_model_dir, ModelManifest};
pub use pipeline::{Analysis, FacePipeline, PipelineError};
pub use recognizer::{Embed, FaceEmbedder, FaceMatcher, RecognizerAdapter};
pub use render::Annotator;
pub use types::{BatchRecord, Detection, Embedding, FaceBox, FaceRecord, IdentityHit, UNKNOWN_NAME};
