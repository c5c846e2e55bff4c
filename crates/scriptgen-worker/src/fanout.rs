//! Fan-out dispatcher.
//!
//! Turns a finished segment set into one image request per segment plus a
//! single voice request, and publishes them all concurrently. A failed
//! publish is recorded and never cancels or retries its siblings.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use scriptgen_models::{
    Audience, DownstreamKind, DownstreamRequest, FanoutFailure, FanoutSummary, GenerationParams,
    ImageMetadata, ImageRequest, JobId, Language, Resolution, ScriptStyle, Segment, VoiceGender,
    VoiceParams, VoiceRequest,
};
use scriptgen_queue::DownstreamPublisher;

use crate::metrics::record_publish;

/// Stage-specific settings copied into every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutParams {
    pub style: ScriptStyle,
    pub audience: Audience,
    pub language: Language,
    pub resolution: Resolution,
    pub voice_gender: VoiceGender,
}

impl FanoutParams {
    pub fn from_params(params: &GenerationParams) -> Self {
        Self {
            style: params.style,
            audience: params.audience,
            language: params.language,
            resolution: Resolution::default(),
            voice_gender: VoiceGender::default(),
        }
    }
}

/// One request that made it onto its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub kind: DownstreamKind,
    pub request: String,
    pub message_id: String,
}

/// Partition of a dispatch into published and failed requests, image and
/// voice requests alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub published: Vec<Published>,
    pub failed: Vec<FanoutFailure>,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Image counts per segment, with the voice request reported on its own.
    pub fn summary(&self) -> FanoutSummary {
        let images_published = self
            .published
            .iter()
            .filter(|p| p.kind == DownstreamKind::Image)
            .count();
        let images_failed = self
            .failed
            .iter()
            .filter(|f| f.kind == DownstreamKind::Image)
            .count();
        FanoutSummary {
            published: images_published as u32,
            failed: images_failed as u32,
            voice_published: self
                .published
                .iter()
                .any(|p| p.kind == DownstreamKind::Voice),
            failures: self.failed.clone(),
        }
    }
}

/// Build the requests for one segment set, images first in segment order.
pub fn build_requests(
    job_id: &JobId,
    segments: &[Segment],
    params: &FanoutParams,
) -> Vec<DownstreamRequest> {
    let Some(first) = segments.first() else {
        return Vec::new();
    };
    let script_id = first.script_id.clone();

    let mut requests: Vec<DownstreamRequest> = segments
        .iter()
        .map(|segment| {
            DownstreamRequest::Image(ImageRequest {
                job_id: job_id.clone(),
                script_id: segment.script_id.clone(),
                segment_id: segment.segment_id.clone(),
                prompt: segment.image_prompt.clone(),
                style: params.style,
                resolution: params.resolution,
                order: segment.order,
                metadata: ImageMetadata {
                    text: segment.text.clone(),
                    audience: params.audience,
                    language: params.language,
                },
            })
        })
        .collect();

    requests.push(DownstreamRequest::Voice(VoiceRequest {
        job_id: job_id.clone(),
        script_id,
        voice: VoiceParams {
            style: params.style,
            gender: params.voice_gender,
            language: params.language,
        },
        segments: segments.iter().map(|s| s.text.clone()).collect(),
    }));

    requests
}

/// Publishes downstream requests.
#[derive(Clone)]
pub struct FanoutDispatcher {
    publisher: Arc<dyn DownstreamPublisher>,
}

impl FanoutDispatcher {
    pub fn new(publisher: Arc<dyn DownstreamPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish every request for `segments`. Not idempotent: callers
    /// dispatch once per completed segmentation.
    pub async fn dispatch(
        &self,
        job_id: &JobId,
        segments: &[Segment],
        params: &FanoutParams,
    ) -> FanoutReport {
        let requests = build_requests(job_id, segments, params);
        if requests.is_empty() {
            return FanoutReport::default();
        }

        let publisher = &self.publisher;
        let results = join_all(requests.iter().map(|request| async move {
            (request, publisher.publish(request).await)
        }))
        .await;

        let mut report = FanoutReport::default();
        for (request, result) in results {
            let label = request.describe();
            match result {
                Ok(message_id) => {
                    record_publish(request.kind().as_str(), true);
                    report.published.push(Published {
                        kind: request.kind(),
                        request: label,
                        message_id,
                    });
                }
                Err(e) => {
                    record_publish(request.kind().as_str(), false);
                    warn!(job_id = %job_id, request = %label, "Downstream publish failed: {}", e);
                    report.failed.push(FanoutFailure {
                        kind: request.kind(),
                        request: label,
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            job_id = %job_id,
            published = report.published.len(),
            failed = report.failed.len(),
            "Fan-out finished"
        );
        report
    }
}
