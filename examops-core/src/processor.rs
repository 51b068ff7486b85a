use crate::config::ExamOpsConfig;
use crate::report::DiffBuilder;
use crate::rules::{FormatError, FormattingReport, RuleEngine};
use crate::scoring::{AdvisoryScorer, ComplianceScorer};
use crate::storage::{
    BaseUrlShareLinks, DocumentSource, DocxFileSource, FileOutputStore, FileTemplateStore, NoShareLinks,
    OutputStore, ShareLinkService, TemplateStore,
};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const FALLBACK_NOTE: &str = " (scorer unavailable, rule-based only)";

/// What a caller asks the pipeline to do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub document_location: String,
    pub template_query: String,
    /// Requesting user, carried for logging only
    #[serde(default)]
    pub user: Option<String>,
}

impl JobRequest {
    /// New request with a fresh v4 job id
    pub fn new(document_location: impl Into<String>, template_query: impl Into<String>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            document_location: document_location.into(),
            template_query: template_query.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Collects per-stage wall-clock timings for one job
#[derive(Debug, Default)]
pub struct StepProfiler {
    timings: Vec<StageTiming>,
}

impl StepProfiler {
    pub fn record(&mut self, stage: JobStage, elapsed: Duration) {
        debug!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        self.timings.push(StageTiming {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    pub fn total_ms(&self) -> u64 {
        self.timings.iter().map(|timing| timing.elapsed_ms).sum()
    }

    pub fn log_summary(&self, job_id: &str) {
        if self.timings.is_empty() {
            return;
        }
        let total = self.total_ms();
        for timing in &self.timings {
            let percentage = if total == 0 {
                0.0
            } else {
                timing.elapsed_ms as f64 / total as f64 * 100.0
            };
            debug!(job_id, stage = %timing.stage, elapsed_ms = timing.elapsed_ms, percentage, "stage timing");
        }
        info!(job_id, total_ms = total, stages = self.timings.len(), "job timings");
    }
}

/// Fatal stage failure, surfaced as `"{TOKEN}: {detail}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub detail: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Working state of one job, threaded through every stage
#[derive(Debug)]
pub struct JobContext {
    pub request: JobRequest,
    pub stage: JobStage,
    pub original: Option<Document>,
    pub template: Option<TemplateRules>,
    pub formatted: Option<Document>,
    pub formatting_report: Option<FormattingReport>,
    pub validation: Option<ValidationResult>,
    pub diff: Option<DiffSummary>,
    pub outputs: Option<OutputLocations>,
    pub share_link: Option<String>,
    pub failure: Option<JobFailure>,
    pub profiler: StepProfiler,
    pub created_at: DateTime<Utc>,
}

impl JobContext {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            stage: JobStage::Pending,
            original: None,
            template: None,
            formatted: None,
            formatting_report: None,
            validation: None,
            diff: None,
            outputs: None,
            share_link: None,
            failure: None,
            profiler: StepProfiler::default(),
            created_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.request.job_id
    }

    fn fail(&mut self, code: ErrorCode, detail: impl Into<String>) {
        let failure = JobFailure {
            code,
            detail: detail.into(),
        };
        error!(job_id = %self.request.job_id, stage = %self.stage, error = %failure, "job failed");
        self.failure = Some(failure);
        self.stage = JobStage::Failed;
    }

    fn scorer_fell_back(&self) -> bool {
        self.validation.as_ref().map_or(false, |v| v.fallback_mode)
    }

    /// Result for a terminal context; `None` while the job is still running
    pub fn result(&self) -> Option<JobResult> {
        let status = match self.stage {
            JobStage::Success => JobStatus::Success,
            JobStage::Partial => JobStatus::Partial,
            JobStage::Failed => JobStatus::Failed,
            _ => return None,
        };
        Some(self.build_result(status))
    }

    fn build_result(&self, status: JobStatus) -> JobResult {
        if let Some(failure) = &self.failure {
            return JobResult {
                job_id: self.request.job_id.clone(),
                status: JobStatus::Failed,
                compliance_score: None,
                formatted_location: None,
                diff_location: None,
                share_link: None,
                summary: format!("Job failed: {}", failure.code),
                error: Some(failure.to_string()),
                error_code: Some(failure.code),
                stage_timings: self.profiler.timings().to_vec(),
                finished_at: Utc::now(),
            };
        }

        let compliance_score = self.validation.as_ref().and_then(|v| v.compliance_score);
        let total_changes = self.diff.as_ref().map_or(0, |diff| diff.total_changes);
        let score = compliance_score
            .map(|score| format!("{score:.1}%"))
            .unwrap_or_else(|| "N/A".to_string());
        let note = if self.scorer_fell_back() { FALLBACK_NOTE } else { "" };

        JobResult {
            job_id: self.request.job_id.clone(),
            status,
            compliance_score,
            formatted_location: self.outputs.as_ref().map(|o| o.document.clone()),
            diff_location: self.outputs.as_ref().map(|o| o.report.clone()),
            share_link: self.share_link.clone(),
            summary: format!(
                "Formatting complete. {total_changes} change(s) applied. Compliance score: {score}.{note}"
            ),
            error: None,
            error_code: None,
            stage_timings: self.profiler.timings().to_vec(),
            finished_at: Utc::now(),
        }
    }
}

/// Runs jobs through download, template lookup, formatting, diff and save
pub struct JobProcessor {
    source: Arc<dyn DocumentSource>,
    templates: Arc<dyn TemplateStore>,
    outputs: Arc<dyn OutputStore>,
    share_links: Arc<dyn ShareLinkService>,
    engine: RuleEngine,
    scorer: Arc<dyn ComplianceScorer>,
    diff_builder: DiffBuilder,
}

impl JobProcessor {
    /// Create JobProcessor with full dependency injection
    pub fn new_with_dependencies(
        source: Arc<dyn DocumentSource>,
        templates: Arc<dyn TemplateStore>,
        outputs: Arc<dyn OutputStore>,
        share_links: Arc<dyn ShareLinkService>,
        engine: RuleEngine,
        scorer: Arc<dyn ComplianceScorer>,
        diff_builder: DiffBuilder,
    ) -> Self {
        Self {
            source,
            templates,
            outputs,
            share_links,
            engine,
            scorer,
            diff_builder,
        }
    }

    /// Local deployment: files in, files out, HTTP scorer if configured
    pub fn from_config(config: &ExamOpsConfig) -> Result<Self, FormatError> {
        let share_links: Arc<dyn ShareLinkService> = match &config.storage.share_base_url {
            Some(base_url) => Arc::new(BaseUrlShareLinks::new(base_url.clone())),
            None => Arc::new(NoShareLinks),
        };

        Ok(Self::new_with_dependencies(
            Arc::new(DocxFileSource),
            Arc::new(FileTemplateStore::new(&config.storage.template_dir)),
            Arc::new(FileOutputStore::new(&config.storage.output_dir)),
            share_links,
            RuleEngine::from_config(&config.formatting.pipeline)?,
            Arc::new(AdvisoryScorer::from_config(&config.scorer)),
            DiffBuilder::new(&config.report),
        ))
    }

    /// Run a job to completion. Never fails; failures are reported in the result.
    pub async fn run(&self, request: JobRequest) -> JobResult {
        let mut ctx = JobContext::new(request);
        info!(
            job_id = %ctx.request.job_id,
            user = ctx.request.user.as_deref().unwrap_or("-"),
            location = %ctx.request.document_location,
            "job started"
        );

        while !ctx.stage.is_terminal() {
            self.advance(&mut ctx).await;
        }
        ctx.profiler.log_summary(ctx.job_id());
        self.finished(&ctx)
    }

    fn finished(&self, ctx: &JobContext) -> JobResult {
        let status = match ctx.stage {
            JobStage::Success => JobStatus::Success,
            JobStage::Partial => JobStatus::Partial,
            _ => JobStatus::Failed,
        };
        let result = ctx.build_result(status);
        info!(job_id = %result.job_id, status = ?result.status, summary = %result.summary, "job finished");
        result
    }

    /// Move `ctx` forward by exactly one stage.
    ///
    /// From a working stage this runs the next stage's work; once saving is
    /// done it settles the job as `success` or `partial`. Terminal contexts
    /// are left alone.
    pub async fn advance(&self, ctx: &mut JobContext) -> JobStage {
        if ctx.stage.is_terminal() {
            return ctx.stage;
        }

        let Some(stage) = ctx.stage.next() else {
            ctx.stage = if ctx.scorer_fell_back() {
                JobStage::Partial
            } else {
                JobStage::Success
            };
            return ctx.stage;
        };

        ctx.stage = stage;
        let started = Instant::now();
        match stage {
            JobStage::Downloading => self.download(ctx).await,
            JobStage::RetrievingTemplate => self.retrieve_template(ctx).await,
            JobStage::Formatting => self.format_and_validate(ctx).await,
            JobStage::GeneratingDiff => self.generate_diff(ctx),
            JobStage::Saving => self.save(ctx).await,
            // `next` only yields working stages
            JobStage::Pending | JobStage::Success | JobStage::Partial | JobStage::Failed => {}
        }
        ctx.profiler.record(stage, started.elapsed());
        ctx.stage
    }

    async fn download(&self, ctx: &mut JobContext) {
        match self.source.load(&ctx.request.document_location).await {
            Ok(document) => {
                info!(
                    job_id = %ctx.request.job_id,
                    paragraphs = document.paragraphs().count(),
                    "document loaded"
                );
                ctx.original = Some(document);
            }
            Err(e) => ctx.fail(ErrorCode::CorruptedFile, e.to_string()),
        }
    }

    async fn retrieve_template(&self, ctx: &mut JobContext) {
        match self.templates.find(&ctx.request.template_query).await {
            Ok(Some(template)) => {
                info!(job_id = %ctx.request.job_id, template = %template.id, "template retrieved");
                ctx.template = Some(template);
            }
            Ok(None) => {
                let detail = format!("no template matches '{}'", ctx.request.template_query);
                ctx.fail(ErrorCode::TemplateNotFound, detail);
            }
            Err(e) => ctx.fail(ErrorCode::TemplateNotFound, e.to_string()),
        }
    }

    async fn format_and_validate(&self, ctx: &mut JobContext) {
        let (Some(original), Some(template)) = (&ctx.original, &ctx.template) else {
            ctx.fail(ErrorCode::Formatting, "document or template missing");
            return;
        };

        let mut formatted = original.clone();
        let report = match self.engine.apply(&mut formatted, template) {
            Ok(report) => report,
            Err(e) => {
                ctx.fail(ErrorCode::Formatting, e.to_string());
                return;
            }
        };

        let validation = self.scorer.score(original, &formatted, template).await;
        if validation.fallback_mode {
            warn!(job_id = %ctx.request.job_id, "no compliance score, job will be partial");
        }

        ctx.formatting_report = Some(report);
        ctx.formatted = Some(formatted);
        ctx.validation = Some(validation);
    }

    fn generate_diff(&self, ctx: &mut JobContext) {
        let (Some(original), Some(formatted)) = (&ctx.original, &ctx.formatted) else {
            ctx.fail(ErrorCode::Formatting, "formatted document missing");
            return;
        };
        let fallback;
        let validation = match &ctx.validation {
            Some(validation) => validation,
            None => {
                fallback = ValidationResult::fallback("not scored");
                &fallback
            }
        };

        let diff = match self.diff_builder.summarize(original, formatted, validation) {
            Ok(diff) => diff,
            Err(e) => {
                warn!(job_id = %ctx.request.job_id, error = %e, "diff report unavailable, continuing without it");
                DiffSummary::empty()
            }
        };
        ctx.diff = Some(diff);
    }

    async fn save(&self, ctx: &mut JobContext) {
        let Some(formatted) = &ctx.formatted else {
            ctx.fail(ErrorCode::Formatting, "formatted document missing");
            return;
        };
        let report_html = ctx.diff.as_ref().map_or("", |diff| diff.html_report.as_str());

        let outputs = match self.outputs.save(&ctx.request.job_id, formatted, report_html).await {
            Ok(outputs) => outputs,
            Err(e) => {
                ctx.fail(ErrorCode::Storage, e.to_string());
                return;
            }
        };

        let share_link = match self.share_links.create_link(&outputs.document).await {
            Ok(link) => link,
            Err(e) => {
                debug!(job_id = %ctx.request.job_id, error = %e, "no share link, using document location");
                outputs.document.clone()
            }
        };
        ctx.share_link = Some(share_link);
        ctx.outputs = Some(outputs);
    }
}

// ===== TOOL-CALL DISPATCH =====
// Lets an orchestrator that only passes job ids drive the same state machine
// one named tool at a time.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    DownloadDocument,
    GetTemplate,
    FormatAndValidate,
    GenerateDiff,
    SaveOutputs,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::DownloadDocument,
        Tool::GetTemplate,
        Tool::FormatAndValidate,
        Tool::GenerateDiff,
        Tool::SaveOutputs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::DownloadDocument => "download_document",
            Tool::GetTemplate => "get_template",
            Tool::FormatAndValidate => "format_and_validate",
            Tool::GenerateDiff => "generate_diff",
            Tool::SaveOutputs => "save_outputs",
        }
    }

    /// Stage this tool runs
    pub fn stage(self) -> JobStage {
        match self {
            Tool::DownloadDocument => JobStage::Downloading,
            Tool::GetTemplate => JobStage::RetrievingTemplate,
            Tool::FormatAndValidate => JobStage::Formatting,
            Tool::GenerateDiff => JobStage::GeneratingDiff,
            Tool::SaveOutputs => JobStage::Saving,
        }
    }

    fn for_stage(stage: JobStage) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| tool.stage() == stage)
    }
}

impl FromStr for Tool {
    type Err = DispatchError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.name() == name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("no job registered with id {0}")]
    UnknownJob(String),

    #[error("job {0} already has a stage in progress")]
    Busy(String),

    #[error("job {job_id} is already registered")]
    DuplicateJob { job_id: String },

    #[error("{tool} called out of order for job {job_id}: expected {expected}")]
    OutOfOrder {
        job_id: String,
        tool: &'static str,
        expected: &'static str,
    },

    #[error("job registry lock poisoned")]
    Poisoned,
}

/// Registry entry: a parked context, or a marker while a stage runs on it
#[derive(Debug)]
enum Slot {
    Idle(JobContext),
    Running(JobStage),
}

/// Jobs in flight, keyed by id
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Slot>>,
}

impl JobRegistry {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, Slot>>, DispatchError> {
        self.jobs.lock().map_err(|_| DispatchError::Poisoned)
    }

    pub fn insert(&self, ctx: JobContext) -> Result<(), DispatchError> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(ctx.job_id()) {
            return Err(DispatchError::DuplicateJob {
                job_id: ctx.request.job_id.clone(),
            });
        }
        jobs.insert(ctx.request.job_id.clone(), Slot::Idle(ctx));
        Ok(())
    }

    /// Take a parked context out for one stage, leaving a running marker behind
    fn check_out(&self, job_id: &str) -> Result<JobContext, DispatchError> {
        let mut jobs = self.lock()?;
        match jobs.remove(job_id) {
            Some(Slot::Idle(ctx)) => {
                jobs.insert(job_id.to_string(), Slot::Running(ctx.stage));
                Ok(ctx)
            }
            Some(running @ Slot::Running(_)) => {
                jobs.insert(job_id.to_string(), running);
                Err(DispatchError::Busy(job_id.to_string()))
            }
            None => Err(DispatchError::UnknownJob(job_id.to_string())),
        }
    }

    /// Park a checked-out context again
    fn check_in(&self, ctx: JobContext) -> Result<(), DispatchError> {
        self.lock()?.insert(ctx.request.job_id.clone(), Slot::Idle(ctx));
        Ok(())
    }

    /// Drop the running marker of a job that reached a terminal stage
    fn release(&self, job_id: &str) -> Result<(), DispatchError> {
        self.lock()?.remove(job_id);
        Ok(())
    }

    /// Remove a parked job. A job with a stage in progress cannot be removed.
    pub fn remove(&self, job_id: &str) -> Result<Option<JobContext>, DispatchError> {
        let mut jobs = self.lock()?;
        match jobs.remove(job_id) {
            Some(Slot::Idle(ctx)) => Ok(Some(ctx)),
            Some(running @ Slot::Running(_)) => {
                jobs.insert(job_id.to_string(), running);
                Err(DispatchError::Busy(job_id.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Current stage; for a running job, the stage it started from
    pub fn stage(&self, job_id: &str) -> Result<Option<JobStage>, DispatchError> {
        Ok(self.lock()?.get(job_id).map(|slot| match slot {
            Slot::Idle(ctx) => ctx.stage,
            Slot::Running(stage) => *stage,
        }))
    }

    pub fn is_running(&self, job_id: &str) -> Result<bool, DispatchError> {
        Ok(matches!(self.lock()?.get(job_id), Some(Slot::Running(_))))
    }

    pub fn len(&self) -> Result<usize, DispatchError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DispatchError> {
        Ok(self.lock()?.is_empty())
    }
}

/// Reply to one tool call
#[derive(Debug, Clone, Serialize)]
pub struct ToolReply {
    pub job_id: JobId,
    pub tool: Tool,
    pub stage: JobStage,
    /// Set once the job reached a terminal stage and left the registry
    pub result: Option<JobResult>,
}

/// Adapter exposing `JobProcessor::advance` as named tools over a registry
pub struct ToolDispatcher {
    processor: Arc<JobProcessor>,
    registry: JobRegistry,
}

impl ToolDispatcher {
    pub fn new(processor: Arc<JobProcessor>) -> Self {
        Self {
            processor,
            registry: JobRegistry::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register a job and return its id
    pub fn open(&self, request: JobRequest) -> Result<JobId, DispatchError> {
        let job_id = request.job_id.clone();
        self.registry.insert(JobContext::new(request))?;
        debug!(job_id = %job_id, "job registered for dispatch");
        Ok(job_id)
    }

    pub async fn dispatch(&self, job_id: &str, tool_name: &str) -> Result<ToolReply, DispatchError> {
        let tool: Tool = tool_name.parse()?;

        // The context leaves the map while its stage runs, so the lock is never
        // held across an await; a concurrent call for the same job gets `Busy`.
        let mut ctx = self.registry.check_out(job_id)?;

        let expected = ctx.stage.next().and_then(Tool::for_stage);
        if expected != Some(tool) {
            let expected = expected.map_or("none", Tool::name);
            self.registry.check_in(ctx)?;
            return Err(DispatchError::OutOfOrder {
                job_id: job_id.to_string(),
                tool: tool.name(),
                expected,
            });
        }

        self.processor.advance(&mut ctx).await;
        // Saving is the last working stage; settle the job right away
        if ctx.stage == JobStage::Saving {
            self.processor.advance(&mut ctx).await;
        }

        if ctx.stage.is_terminal() {
            ctx.profiler.log_summary(ctx.job_id());
            self.registry.release(job_id)?;
            let result = self.processor.finished(&ctx);
            return Ok(ToolReply {
                job_id: job_id.to_string(),
                tool,
                stage: ctx.stage,
                result: Some(result),
            });
        }

        let stage = ctx.stage;
        self.registry.check_in(ctx)?;
        Ok(ToolReply {
            job_id: job_id.to_string(),
            tool,
            stage,
            result: None,
        })
    }
}
