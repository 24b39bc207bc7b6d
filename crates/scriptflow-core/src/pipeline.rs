//! The fixed three-step pipeline, described as data.
//!
//! Every step-specific detail (webhook path, configuration key, payload shape,
//! result rendering) lives in [`PIPELINE`]; triggering and polling code is
//! generic over it.

use crate::project::Project;
use crate::types::StepNumber;
use serde_json::{json, Value};

/// Inputs available to a payload builder. User identity is passed explicitly.
pub struct StepContext<'a> {
    pub project: &'a Project,
    pub user_id: &'a str,
}

pub struct StepSpec {
    pub number: StepNumber,
    pub name: &'static str,
    /// Path segment under `/api/webhook/`.
    pub slug: &'static str,
    /// Environment variable holding the webhook target URL.
    pub env_var: &'static str,
    /// Key under which the step's result is presented to clients.
    pub result_key: &'static str,
    pub default_model: &'static str,
    /// Outline results are markdown documents rather than JSON.
    pub markdown_result: bool,
    pub not_configured_message: &'static str,
    build_payload: fn(&StepContext<'_>) -> Value,
}

impl StepSpec {
    pub fn trigger_path(&self) -> String {
        format!("/api/webhook/{}", self.slug)
    }

    pub fn payload(&self, ctx: &StepContext<'_>) -> Value {
        (self.build_payload)(ctx)
    }
}

fn transcript_payload(ctx: &StepContext<'_>) -> Value {
    json!({
        "youtube-url": ctx.project.youtube_url,
        "client-info": ctx.project.client_info.clone().unwrap_or_default(),
        "context": ctx.project.context,
        "project-id": ctx.project.id,
        "user-id": ctx.user_id,
    })
}

fn project_payload(ctx: &StepContext<'_>) -> Value {
    json!({
        "project-id": ctx.project.id,
        "user-id": ctx.user_id,
    })
}

pub static PIPELINE: [StepSpec; 3] = [
    StepSpec {
        number: StepNumber::TranscriptAnalysis,
        name: "Transcript Analysis",
        slug: "transcript-analysis",
        env_var: "TRANSCRIPT_ANALYSIS_WEBHOOK_URL",
        result_key: "transcript",
        default_model: "anthropic/claude-3.5-sonnet-20241022",
        markdown_result: false,
        not_configured_message: "Webhook URL not configured",
        build_payload: transcript_payload,
    },
    StepSpec {
        number: StepNumber::Research,
        name: "Research",
        slug: "research",
        env_var: "RESEARCH_WEBHOOK_URL",
        result_key: "research",
        default_model: "perplexity/llama-3.1-sonar-large-128k-online",
        markdown_result: false,
        not_configured_message: "Research webhook URL not configured",
        build_payload: project_payload,
    },
    StepSpec {
        number: StepNumber::OutlineGeneration,
        name: "Outline Generation",
        slug: "outline-generation",
        env_var: "OUTLINE_GENERATION_WEBHOOK_URL",
        result_key: "outline",
        default_model: "anthropic/claude-3-opus-20240229",
        markdown_result: true,
        not_configured_message: "Outline generation webhook URL not configured",
        build_payload: project_payload,
    },
];

pub fn spec(step: StepNumber) -> &'static StepSpec {
    &PIPELINE[usize::from(step.get()) - 1]
}

pub fn by_slug(slug: &str) -> Option<&'static StepSpec> {
    PIPELINE.iter().find(|s| s.slug == slug)
}
