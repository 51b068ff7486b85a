//! Job pipeline tests: the orchestrator driven end to end against in-memory
//! collaborators, the tool-call dispatcher, and the filesystem deployment
//! reading and writing real .docx packages.

use async_trait::async_trait;
use examops_core::processor::{DispatchError, JobProcessor, JobRequest, ToolDispatcher};
use examops_core::report::DiffBuilder;
use examops_core::rules::RuleEngine;
use examops_core::scoring::{AdvisoryScorer, DisabledBackend, ScoringBackend, ScoringError, ScoringRequest};
use examops_core::config::ReportConfig;
use examops_core::storage::{
    DocumentSource, MemoryDocumentSource, MemoryOutputStore, MemoryTemplateStore, NoShareLinks,
    OutputStore, SourceError,
};
use examops_core::types::*;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

const INPUT: &str = "memory://papers/midterm.docx";

const SCORED_RESPONSE: &str = r#"{
    "compliance_score": 95.0,
    "category_scores": {"numbering": 100.0, "marks": 90.0},
    "issues_found": ["Numbering corrected", "Marks notation normalised", "Colon spacing fixed"],
    "edge_cases": [],
    "math_expressions_preserved": true,
    "summary": "Mostly compliant"
}"#;

struct CannedBackend(&'static str);

#[async_trait]
impl ScoringBackend for CannedBackend {
    async fn complete(&self, _request: &ScoringRequest) -> Result<String, ScoringError> {
        Ok(self.0.to_string())
    }
}

fn exam_paper() -> Document {
    Document::from_texts(["Q1) What is x?", "1a) desc [3 marks]", "DATE :Jan 2025"])
}

struct Harness {
    processor: JobProcessor,
    outputs: Arc<MemoryOutputStore>,
}

fn harness_with(
    templates: MemoryTemplateStore,
    outputs: MemoryOutputStore,
    backend: Arc<dyn ScoringBackend>,
) -> Harness {
    let source = MemoryDocumentSource::default().with_document(INPUT, exam_paper());
    harness_from(Arc::new(source), templates, outputs, backend, DiffBuilder::default())
}

fn harness_from(
    source: Arc<dyn DocumentSource>,
    templates: MemoryTemplateStore,
    outputs: MemoryOutputStore,
    backend: Arc<dyn ScoringBackend>,
    diff_builder: DiffBuilder,
) -> Harness {
    let outputs = Arc::new(outputs);
    let processor = JobProcessor::new_with_dependencies(
        source,
        Arc::new(templates),
        outputs.clone() as Arc<dyn OutputStore>,
        Arc::new(NoShareLinks),
        RuleEngine::default(),
        Arc::new(AdvisoryScorer::new(backend, Duration::from_secs(5), 4000)),
        diff_builder,
    );
    Harness { processor, outputs }
}

fn harness(backend: Arc<dyn ScoringBackend>) -> Harness {
    harness_with(
        MemoryTemplateStore::Found(TemplateRules::default()),
        MemoryOutputStore::default(),
        backend,
    )
}

fn request() -> JobRequest {
    JobRequest::new(INPUT, "exam paper formatting rules").with_user("lecturer@example.edu")
}

// ============================================================================
// Direct invocation
// ============================================================================

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn exam_paper_is_formatted_scored_and_saved() {
        let h = harness(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let request = request();
        let job_id = request.job_id.clone();

        let result = h.processor.run(request).await;

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.compliance_score, Some(95.0));
        assert_eq!(result.error, None);
        assert_eq!(
            result.summary,
            "Formatting complete. 4 change(s) applied. Compliance score: 95.0%."
        );
        assert_eq!(result.stage_timings.len(), 5);

        let saved = h.outputs.saved(&job_id).expect("outputs saved");
        let lines = saved.document.text_lines();
        assert!(lines[0].starts_with("Q1."));
        assert!(lines[1].starts_with("(a)"));
        assert!(lines[1].contains("(3 marks)"));
        assert!(!lines[1].contains('['));
        assert!(lines[2].contains(" : "));
        assert_eq!(saved.document.header_text(), DEFAULT_HEADER_TEXT);
        assert_eq!(saved.document.sections[0].margins, Margins::INSTITUTIONAL);

        assert!(saved.report_html.contains("Numbering fixes: 1"));
        assert!(saved.report_html.contains("Spacing fixes: 1"));
        assert!(saved.report_html.contains("Mark notation fixes: 1"));
        assert!(saved.report_html.contains("Header/footer changed: Yes"));
    }

    #[tokio::test]
    async fn share_link_falls_back_to_document_location() {
        let h = harness(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let result = h.processor.run(request()).await;

        assert!(result.formatted_location.is_some());
        assert_eq!(result.share_link, result.formatted_location);
        assert!(result.diff_location.unwrap().ends_with("diff.html"));
    }

    #[tokio::test]
    async fn math_paragraphs_reach_the_output_unchanged() {
        let h = harness(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let math = Paragraph {
            runs: vec![
                Run::plain("Q2) Solve "),
                Run::math("<m:oMath><m:r><m:t>x+1=2</m:t></m:r></m:oMath>", "x+1=2"),
            ],
            ..Paragraph::default()
        };
        let mut document = exam_paper();
        document.push_paragraph(math.clone());

        let processor = JobProcessor::new_with_dependencies(
            Arc::new(MemoryDocumentSource::default().with_document(INPUT, document)),
            Arc::new(MemoryTemplateStore::Found(TemplateRules::default())),
            h.outputs.clone() as Arc<dyn OutputStore>,
            Arc::new(NoShareLinks),
            RuleEngine::default(),
            Arc::new(AdvisoryScorer::new(
                Arc::new(CannedBackend(SCORED_RESPONSE)),
                Duration::from_secs(5),
                4000,
            )),
            DiffBuilder::default(),
        );
        let request = request();
        let job_id = request.job_id.clone();
        processor.run(request).await;

        let saved = h.outputs.saved(&job_id).unwrap();
        assert_eq!(saved.document.paragraphs().last(), Some(&math));
    }
}

mod failure_modes {
    use super::*;

    fn assert_failed(result: &JobResult, code: ErrorCode) {
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error_code, Some(code));
        assert_eq!(result.summary, format!("Job failed: {code}"));
        assert!(result.error.as_deref().unwrap().starts_with(&format!("{code}: ")));
        assert_eq!(result.compliance_score, None);
        assert_eq!(result.formatted_location, None);
    }

    #[tokio::test]
    async fn empty_template_result_fails_the_job() {
        let h = harness_with(
            MemoryTemplateStore::Empty,
            MemoryOutputStore::default(),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
        );
        let result = h.processor.run(request()).await;
        assert_failed(&result, ErrorCode::TemplateNotFound);
    }

    #[tokio::test]
    async fn template_store_error_fails_the_job() {
        let h = harness_with(
            MemoryTemplateStore::Failing("index offline".to_string()),
            MemoryOutputStore::default(),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
        );
        let result = h.processor.run(request()).await;
        assert_failed(&result, ErrorCode::TemplateNotFound);
        assert!(result.error.unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn unknown_document_is_reported_as_corrupted() {
        let h = harness(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let result = h
            .processor
            .run(JobRequest::new("memory://papers/absent.docx", "exam"))
            .await;
        assert_failed(&result, ErrorCode::CorruptedFile);
        assert_eq!(result.stage_timings.len(), 1);
    }

    #[tokio::test]
    async fn invalid_template_is_a_formatting_failure() {
        let template = TemplateRules {
            margin_cm: MarginRules {
                left: Some(-1.0),
                ..MarginRules::default()
            },
            ..TemplateRules::default()
        };
        let h = harness_with(
            MemoryTemplateStore::Found(template),
            MemoryOutputStore::default(),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
        );
        let result = h.processor.run(request()).await;
        assert_failed(&result, ErrorCode::Formatting);
    }

    #[tokio::test]
    async fn storage_failure_fails_the_job() {
        let h = harness_with(
            MemoryTemplateStore::Found(TemplateRules::default()),
            MemoryOutputStore::failing("quota exceeded"),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
        );
        let result = h.processor.run(request()).await;
        assert_failed(&result, ErrorCode::Storage);
    }

    #[tokio::test]
    async fn scorer_outage_yields_partial_result() {
        let h = harness(Arc::new(DisabledBackend));
        let result = h.processor.run(request()).await;

        assert_eq!(result.status, JobStatus::Partial);
        assert_eq!(result.compliance_score, None);
        assert!(!result.formatted_location.clone().unwrap_or_default().is_empty());
        assert!(result.summary.contains("Compliance score: N/A."));
        assert!(result.summary.ends_with("(scorer unavailable, rule-based only)"));
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn refused_diff_still_saves_the_formatted_document() {
        let source = MemoryDocumentSource::default().with_document(INPUT, exam_paper());
        let h = harness_from(
            Arc::new(source),
            MemoryTemplateStore::Found(TemplateRules::default()),
            MemoryOutputStore::default(),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
            DiffBuilder::new(&ReportConfig {
                context_lines: 3,
                max_diff_cells: 0,
            }),
        );
        let request = request();
        let job_id = request.job_id.clone();

        let result = h.processor.run(request).await;

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.error, None);
        assert!(result.formatted_location.is_some());
        assert!(result.summary.contains("0 change(s) applied"));
        assert_eq!(result.compliance_score, Some(95.0));

        let saved = h.outputs.saved(&job_id).expect("outputs saved");
        assert!(saved.report_html.is_empty());
        assert!(saved.document.text_lines()[0].starts_with("Q1."));
    }

    #[tokio::test]
    async fn malformed_scorer_reply_yields_partial_result() {
        let h = harness(Arc::new(CannedBackend(r#"{"compliance_score": 140.0}"#)));
        let result = h.processor.run(request()).await;
        assert_eq!(result.status, JobStatus::Partial);
    }
}

// ============================================================================
// Tool-call dispatch
// ============================================================================

mod dispatch {
    use super::*;
    use tokio::sync::Notify;

    const ORDER: [&str; 5] = [
        "download_document",
        "get_template",
        "format_and_validate",
        "generate_diff",
        "save_outputs",
    ];

    fn dispatcher(backend: Arc<dyn ScoringBackend>) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(harness(backend).processor))
    }

    #[tokio::test]
    async fn tools_in_order_complete_the_job() {
        let dispatcher = dispatcher(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let job_id = dispatcher.open(request()).unwrap();

        let mut last = None;
        for tool in ORDER {
            let reply = dispatcher.dispatch(&job_id, tool).await.unwrap();
            last = Some(reply);
        }

        let reply = last.unwrap();
        assert_eq!(reply.stage, JobStage::Success);
        let result = reply.result.unwrap();
        assert_eq!(result.compliance_score, Some(95.0));
        assert_eq!(dispatcher.registry().is_empty(), Ok(true));
    }

    #[tokio::test]
    async fn intermediate_replies_carry_the_stage_reached() {
        let dispatcher = dispatcher(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let job_id = dispatcher.open(request()).unwrap();

        let reply = dispatcher.dispatch(&job_id, "download_document").await.unwrap();
        assert_eq!(reply.stage, JobStage::Downloading);
        assert!(reply.result.is_none());
        assert_eq!(dispatcher.registry().stage(&job_id), Ok(Some(JobStage::Downloading)));
    }

    #[tokio::test]
    async fn out_of_order_calls_are_rejected_without_side_effects() {
        let dispatcher = dispatcher(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let job_id = dispatcher.open(request()).unwrap();

        let err = dispatcher.dispatch(&job_id, "format_and_validate").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::OutOfOrder {
                job_id: job_id.clone(),
                tool: "format_and_validate",
                expected: "download_document",
            }
        );
        assert_eq!(dispatcher.registry().stage(&job_id), Ok(Some(JobStage::Pending)));

        dispatcher.dispatch(&job_id, "download_document").await.unwrap();
        let err = dispatcher.dispatch(&job_id, "download_document").await.unwrap_err();
        assert!(matches!(err, DispatchError::OutOfOrder { expected: "get_template", .. }));
    }

    #[tokio::test]
    async fn unknown_tools_and_jobs_are_rejected() {
        let dispatcher = dispatcher(Arc::new(CannedBackend(SCORED_RESPONSE)));
        let job_id = dispatcher.open(request()).unwrap();

        assert!(matches!(
            dispatcher.dispatch(&job_id, "delete_everything").await,
            Err(DispatchError::UnknownTool(_))
        ));
        assert!(matches!(
            dispatcher.dispatch("no-such-job", "download_document").await,
            Err(DispatchError::UnknownJob(_))
        ));
    }

    /// Serves the exam paper once the test opens the gate
    struct GatedSource {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl DocumentSource for GatedSource {
        async fn load(&self, _location: &str) -> Result<Document, SourceError> {
            self.gate.notified().await;
            Ok(exam_paper())
        }
    }

    #[tokio::test]
    async fn a_call_while_a_stage_runs_is_busy_not_unknown() {
        let gate = Arc::new(Notify::new());
        let h = harness_from(
            Arc::new(GatedSource { gate: gate.clone() }),
            MemoryTemplateStore::Found(TemplateRules::default()),
            MemoryOutputStore::default(),
            Arc::new(CannedBackend(SCORED_RESPONSE)),
            DiffBuilder::default(),
        );
        let dispatcher = ToolDispatcher::new(Arc::new(h.processor));
        let job_id = dispatcher.open(request()).unwrap();

        let (first, second) = tokio::join!(dispatcher.dispatch(&job_id, "download_document"), async {
            while !dispatcher.registry().is_running(&job_id).unwrap() {
                tokio::task::yield_now().await;
            }
            let busy = dispatcher.dispatch(&job_id, "get_template").await;
            gate.notify_one();
            busy
        });

        assert_eq!(second.unwrap_err(), DispatchError::Busy(job_id.clone()));
        assert_eq!(first.unwrap().stage, JobStage::Downloading);
        assert_eq!(dispatcher.registry().is_running(&job_id), Ok(false));
        dispatcher.dispatch(&job_id, "get_template").await.unwrap();
    }

    #[tokio::test]
    async fn fatal_stage_returns_the_failed_result() {
        let dispatcher = ToolDispatcher::new(Arc::new(
            harness_with(
                MemoryTemplateStore::Empty,
                MemoryOutputStore::default(),
                Arc::new(DisabledBackend),
            )
            .processor,
        ));
        let job_id = dispatcher.open(request()).unwrap();

        dispatcher.dispatch(&job_id, "download_document").await.unwrap();
        let reply = dispatcher.dispatch(&job_id, "get_template").await.unwrap();

        assert_eq!(reply.stage, JobStage::Failed);
        assert_eq!(reply.result.unwrap().error_code, Some(ErrorCode::TemplateNotFound));
        assert!(matches!(
            dispatcher.dispatch(&job_id, "format_and_validate").await,
            Err(DispatchError::UnknownJob(_))
        ));
    }
}

// ============================================================================
// Filesystem deployment
// ============================================================================

mod docx_files {
    use super::*;
    use examops_core::config::ExamOpsConfig;
    use examops_core::preprocessors::{DocxPreprocessor, DocxWriter, Preprocessor};
    use examops_core::storage::local_path;
    use tempfile::TempDir;

    fn sample_document() -> Document {
        let mut document = exam_paper();
        document.body.insert(
            1,
            Block::Opaque("<w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>".to_string()),
        );
        document.sections[0].footer = vec![Paragraph::from_text("Page")];
        document
    }

    #[test]
    fn read_format_write_read_keeps_text_margins_and_header() {
        let bytes = DocxWriter.to_bytes(&sample_document()).unwrap();
        let mut document = DocxPreprocessor.process(&bytes).unwrap();

        RuleEngine::default()
            .apply(&mut document, &TemplateRules::default())
            .unwrap();
        let expected_lines = document.text_lines();

        let reread = DocxPreprocessor
            .process(&DocxWriter.to_bytes(&document).unwrap())
            .unwrap();

        assert_eq!(reread.text_lines(), expected_lines);
        assert_eq!(reread.header_text(), DEFAULT_HEADER_TEXT);
        assert_eq!(reread.footer_text(), "Page");
        assert_eq!(reread.sections[0].margins, Margins::INSTITUTIONAL);
        assert!(matches!(&reread.body[1], Block::Opaque(xml) if xml.contains("cell")));
        let indents: Vec<_> = reread.paragraphs().map(|p| p.left_indent_cm).collect();
        assert_eq!(indents, vec![Some(0.0), Some(1.5), None]);
    }

    #[tokio::test]
    async fn configured_processor_formats_files_on_disk() {
        let workspace = TempDir::new().unwrap();
        let template_dir = workspace.path().join("templates");
        let output_dir = workspace.path().join("output");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(
            template_dir.join("exam.yaml"),
            "title: Exam paper formatting rules\nheader_text: NORTHERN TECHNICAL INSTITUTE\n",
        )
        .unwrap();
        let input = workspace.path().join("midterm.docx");
        std::fs::write(&input, DocxWriter.to_bytes(&sample_document()).unwrap()).unwrap();

        let mut config = ExamOpsConfig::default();
        config.storage.template_dir = template_dir;
        config.storage.output_dir = output_dir.clone();
        let processor = JobProcessor::from_config(&config).unwrap();

        let result = processor
            .run(JobRequest::new(input.display().to_string(), "exam paper"))
            .await;

        // No scorer endpoint is configured
        assert_eq!(result.status, JobStatus::Partial);
        let formatted = result.formatted_location.unwrap();
        assert!(formatted.starts_with("file://"));

        let document = DocxPreprocessor
            .process_file(std::path::Path::new(local_path(&formatted)))
            .unwrap();
        assert_eq!(document.header_text(), "NORTHERN TECHNICAL INSTITUTE");
        assert!(document.text_lines()[0].starts_with("Q1."));

        let report = std::fs::read_to_string(local_path(&result.diff_location.unwrap())).unwrap();
        assert!(report.contains("N/A (scorer unavailable)"));
    }
}
