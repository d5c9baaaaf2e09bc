//! Trigger-to-bundle pipeline.
//!
//! Built once at startup and shared by reference; every trigger runs through
//! selection, packaging and submission independently of the others.

use crate::error::PipelineError;
use crate::location::LocationProvider;
use crate::packager::BundlePackager;
use crate::selector::{EvidenceSelector, Selection};
use crate::sink::{SubmitReceipt, UploadSink};
use blackbox_common::naming::format_stamp;
use blackbox_common::{BundleStats, Location, TriggerEvent};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// How one trigger was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// A bundle was packaged and accepted by the sink
    Submitted {
        receipt: SubmitReceipt,
        stats: BundleStats,
    },
    /// No chunks existed to package
    NoEvidence,
}

/// The evidence pipeline handle.
pub struct EvidencePipeline {
    selector: EvidenceSelector,
    packager: Arc<BundlePackager>,
    location: Arc<dyn LocationProvider>,
    sink: Arc<dyn UploadSink>,
    chunk_seconds: u32,
}

impl EvidencePipeline {
    pub fn new(
        selector: EvidenceSelector,
        packager: BundlePackager,
        location: Arc<dyn LocationProvider>,
        sink: Arc<dyn UploadSink>,
        chunk_seconds: u32,
    ) -> Self {
        Self {
            selector,
            packager: Arc::new(packager),
            location,
            sink,
            chunk_seconds,
        }
    }

    pub fn selector(&self) -> &EvidenceSelector {
        &self.selector
    }

    /// Select, package and submit the evidence for one trigger.
    pub async fn handle_trigger(&self, trigger: &TriggerEvent) -> Result<TriggerOutcome, PipelineError> {
        let window = match self.selector.select_evidence(trigger.fired_at).await? {
            Selection::Found(window) => window,
            Selection::NoEvidence => {
                warn!(fired_at = %trigger.fired_at, "Trigger fired with no recorded chunks");
                return Ok(TriggerOutcome::NoEvidence);
            }
        };

        let metadata = trigger_metadata(
            trigger,
            self.location.current_location(),
            self.chunk_seconds,
        );
        let packager = self.packager.clone();
        let bundle = tokio::task::spawn_blocking(move || packager.package(&window, metadata)).await??;
        let stats = bundle.stats.clone();

        let sink = self.sink.clone();
        let name = format_stamp(&trigger.fired_at);
        let receipt = tokio::task::spawn_blocking(move || sink.submit_bundle(&name, bundle)).await??;

        info!(
            fired_at = %trigger.fired_at,
            bundle = %receipt.id,
            files = stats.file_count,
            "Evidence submitted"
        );
        Ok(TriggerOutcome::Submitted { receipt, stats })
    }
}

/// Metadata describing a trigger, merged into its bundle.
pub fn trigger_metadata(
    trigger: &TriggerEvent,
    location: Option<Location>,
    chunk_seconds: u32,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "fired_at".into(),
        json!(trigger.fired_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
    );
    metadata.insert("trigger_text".into(), json!(trigger.text));
    metadata.insert("chunk_seconds".into(), json!(chunk_seconds));
    match location {
        Some(location) => {
            metadata.insert("lat".into(), json!(location.lat));
            metadata.insert("lng".into(), json!(location.lng));
            metadata.insert("location_valid".into(), json!(location.valid));
        }
        None => {
            metadata.insert("lat".into(), Value::Null);
            metadata.insert("lng".into(), Value::Null);
            metadata.insert("location_valid".into(), json!(false));
        }
    }
    metadata
}
