//! Blackbox recording service.
//!
//! Records a camera into a rolling directory of fixed-length chunks and, when
//! a trigger fires, assembles the chunks around it into an evidence bundle.

pub mod capture;
pub mod chunks;
pub mod config;
pub mod encoder;
pub mod error;
pub mod location;
pub mod logging;
pub mod packager;
pub mod pipeline;
pub mod recorder;
pub mod selector;
pub mod sink;
pub mod trigger;

pub use error::{
    ConfigError, EncoderError, PackageError, PipelineError, RecorderError, SelectorError, SinkError,
};
pub use packager::{BundlePackager, EvidenceBundle};
pub use pipeline::{EvidencePipeline, TriggerOutcome};
pub use recorder::{ChunkRecorder, RecorderEvent, RecorderHandle, RecorderSettings, StopReason};
pub use selector::{select_window, EvidenceSelector, Selection, SelectorSettings};
