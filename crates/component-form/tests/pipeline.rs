use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use component_form::{
    AnswerBatch, BackendError, ConfigBackend, FormBackend, FormRecord, InMemoryBackend,
    MemorySession, NewReview, PipelineError, ReviewTarget, RuntimeConfig, SessionStore,
    StepOutcome, SubmissionPipeline, UpsertOutcome, open_form,
};
use form_spec::{
    Answer, AnswerCollector, AutoLink, BlockId, ConfigOverlay, FormTemplate, LabelContext,
    OptionId, StepBatch, build_render_payload,
};

fn template() -> FormTemplate {
    serde_json::from_str(include_str!("../../form-spec/tests/fixtures/root_form.json"))
        .expect("template")
}

/// Wraps the in-memory backend with injected failures and latency.
struct TestBackend {
    inner: InMemoryBackend,
    failures: AtomicUsize,
    delay: Duration,
    creates: AtomicUsize,
    upserts: StdMutex<Vec<AnswerBatch>>,
}

impl TestBackend {
    async fn new() -> Self {
        let inner = InMemoryBackend::new(Arc::new(AutoLink::default()));
        inner.insert_form("root", template()).await;
        Self {
            inner,
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
            creates: AtomicUsize::new(0),
            upserts: StdMutex::new(Vec::new()),
        }
    }

    fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn upserts(&self) -> Vec<AnswerBatch> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl FormBackend for TestBackend {
    async fn get_form(&self, form_id: &str) -> Result<FormRecord, BackendError> {
        self.inner.get_form(form_id).await
    }

    async fn create_review(&self, review: NewReview) -> Result<Uuid, BackendError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_review(review).await
    }

    async fn upsert_answers(
        &self,
        review_id: Uuid,
        batch: AnswerBatch,
    ) -> Result<UpsertOutcome, BackendError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("connection reset".into()));
        }
        self.upserts.lock().unwrap().push(batch.clone());
        self.inner.upsert_answers(review_id, batch).await
    }

    async fn finalize_review(&self, review_id: Uuid) -> Result<(), BackendError> {
        self.inner.finalize_review(review_id).await
    }
}

fn target() -> ReviewTarget {
    ReviewTarget {
        form_id: "root".into(),
        product_id: 42,
        button_id: Some(7),
    }
}

async fn collector(backend: &TestBackend) -> AnswerCollector {
    open_form(backend, "root", &RuntimeConfig::default())
        .await
        .expect("form")
}

fn answer_first_step(collector: &mut AnswerCollector) {
    collector.select(BlockId(101), OptionId(1003)).unwrap();
    collector.select(BlockId(102), OptionId(1012)).unwrap();
}

#[tokio::test]
async fn first_save_creates_the_review_and_resaves_only_changes() {
    let backend = Arc::new(TestBackend::new().await);
    let session = Arc::new(MemorySession::new());
    let pipeline = SubmissionPipeline::new(backend.clone(), session.clone(), target());

    let mut collector = collector(&backend).await;
    answer_first_step(&mut collector);
    let batch = collector.step_batch(0);

    let receipt = pipeline.save_step(&batch).await.expect("save");
    assert_eq!(receipt.upserted, 2);
    assert!(pipeline.is_step_saved(0).await);
    assert!(session.session_id().await.is_some());

    let review = backend.inner.review(receipt.review_id).await.expect("review");
    assert_eq!(review.product_id, 42);
    assert_eq!(review.button_id, Some(7));
    assert_eq!(review.config_version, 0);
    assert_eq!(review.session_id, session.session_id().await.unwrap());
    assert_eq!(review.answers.len(), 2);

    let again = pipeline.save_step(&batch).await.expect("resave");
    assert_eq!(again.upserted, 0);
    assert_eq!(again.review_id, receipt.review_id);
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
    assert_eq!(backend.upserts().len(), 1);
}

#[tokio::test]
async fn answers_of_closed_branches_are_retracted() {
    let backend = Arc::new(TestBackend::new().await);
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;

    collector.select(BlockId(200), OptionId(2003)).unwrap();
    collector.select(BlockId(203), OptionId(2031)).unwrap();
    let receipt = pipeline.save_step(&collector.step_batch(1)).await.unwrap();
    assert_eq!(receipt.upserted, 2);

    collector.deselect(BlockId(200), OptionId(2003)).unwrap();
    collector.select(BlockId(200), OptionId(2002)).unwrap();
    collector.select(BlockId(202), OptionId(2021)).unwrap();
    let receipt = pipeline.save_step(&collector.step_batch(1)).await.unwrap();
    assert_eq!(receipt.retracted, vec![BlockId(203)]);

    let review = backend.inner.review(receipt.review_id).await.unwrap();
    let blocks: Vec<_> = review.answers.iter().map(|answer| answer.block_id).collect();
    assert_eq!(blocks, vec![BlockId(200), BlockId(202)]);
}

#[tokio::test]
async fn failed_save_leaves_the_step_unsaved_and_can_be_replayed() {
    let backend = Arc::new(TestBackend::new().await.failing(1));
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;
    answer_first_step(&mut collector);
    let batch = collector.step_batch(0);

    let err = pipeline.save_step(&batch).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Backend(ref backend_err) if backend_err.is_retryable()
    ));
    assert!(!pipeline.is_step_saved(0).await);

    let receipt = pipeline.save_step(&batch).await.expect("retry");
    assert_eq!(receipt.upserted, 2);
    assert!(pipeline.is_step_saved(0).await);
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_continue_keeps_the_collector_on_its_step() {
    let backend = Arc::new(TestBackend::new().await.failing(1));
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;
    answer_first_step(&mut collector);

    assert!(pipeline.continue_step(&mut collector).await.is_err());
    assert_eq!(collector.current_step(), 0);
    assert_eq!(collector.step_state(0), form_spec::StepState::Valid);

    let outcome = pipeline.continue_step(&mut collector).await.expect("retry");
    assert!(matches!(outcome, StepOutcome::Advanced(_, 1)));
    assert_eq!(collector.step_state(0), form_spec::StepState::Submitted);
}

#[tokio::test]
async fn saves_are_applied_in_submission_order() {
    let backend = Arc::new(
        TestBackend::new()
            .await
            .slow(Duration::from_millis(20)),
    );
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());

    let batch = |option: u32| StepBatch {
        step_index: 0,
        config_version: 0,
        answers: vec![Answer {
            block_id: BlockId(101),
            field_code: "satisfaction".into(),
            answer_item_id: Some(OptionId(option)),
            answer_text: None,
        }],
        cleared_blocks: vec![],
    };
    let (first, second) = (batch(1001), batch(1003));

    let (a, b) = tokio::join!(pipeline.save_step(&first), pipeline.save_step(&second));
    let review_id = a.expect("first").review_id;
    assert_eq!(b.expect("second").review_id, review_id);

    let order: Vec<_> = backend
        .upserts()
        .iter()
        .map(|batch| batch.answers[0].answer_item_id)
        .collect();
    assert_eq!(order, vec![Some(OptionId(1001)), Some(OptionId(1003))]);
    let review = backend.inner.review(review_id).await.unwrap();
    assert_eq!(review.answers[0].answer_item_id, Some(OptionId(1003)));
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn next_step_renders_while_the_save_is_in_flight() {
    let backend = Arc::new(
        TestBackend::new()
            .await
            .slow(Duration::from_millis(50)),
    );
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;
    answer_first_step(&mut collector);
    let batch = collector.form_batch(0);

    let (receipt, title) = tokio::join!(pipeline.save_step(&batch), async {
        tokio::task::yield_now().await;
        assert!(backend.upserts().is_empty());
        assert_eq!(collector.advance(), Ok(Some(1)));
        build_render_payload(&collector, 1, &LabelContext::default())
            .map(|payload| payload.step.title)
    });

    assert_eq!(title.as_deref(), Some("Aides"));
    assert_eq!(receipt.expect("save").upserted, 2);
    collector.mark_submitted(0);
    assert!(pipeline.is_step_saved(0).await);
    assert_eq!(backend.upserts().len(), 1);
}

#[tokio::test]
async fn completing_the_form_finalizes_the_review() {
    let backend = Arc::new(TestBackend::new().await);
    let session = Arc::new(MemorySession::new());
    let pipeline = SubmissionPipeline::new(backend.clone(), session.clone(), target());
    let mut collector = collector(&backend).await;

    answer_first_step(&mut collector);
    assert!(matches!(
        pipeline.continue_step(&mut collector).await,
        Ok(StepOutcome::Advanced(_, 1))
    ));

    assert!(matches!(
        pipeline.continue_step(&mut collector).await,
        Err(PipelineError::Collect(_))
    ));
    collector.select(BlockId(200), OptionId(2001)).unwrap();
    assert!(matches!(
        pipeline.continue_step(&mut collector).await,
        Ok(StepOutcome::Advanced(_, 2))
    ));

    collector.set_text(BlockId(300), "Rien à ajouter").unwrap();
    let outcome = pipeline.continue_step(&mut collector).await.expect("finalize");
    let StepOutcome::Finalized(receipt) = outcome else {
        panic!("expected finalization");
    };

    assert!(pipeline.is_finalized().await);
    assert_eq!(session.session_id().await, None);
    let review = backend.inner.review(receipt.review_id).await.unwrap();
    assert!(review.is_finalized());
    assert_eq!(review.answers.len(), 4);

    assert!(matches!(
        pipeline.save_step(&collector.step_batch(2)).await,
        Err(PipelineError::Finalized)
    ));
}

#[tokio::test]
async fn edits_made_on_earlier_steps_reach_the_review() {
    let backend = Arc::new(TestBackend::new().await);
    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;

    answer_first_step(&mut collector);
    pipeline.continue_step(&mut collector).await.expect("step 0");
    collector.select(BlockId(200), OptionId(2001)).unwrap();
    pipeline.continue_step(&mut collector).await.expect("step 1");

    collector.go_to(0).unwrap();
    collector.select(BlockId(101), OptionId(1001)).unwrap();
    collector.go_to(2).unwrap();
    let outcome = pipeline.continue_step(&mut collector).await.expect("finalize");
    let StepOutcome::Finalized(receipt) = outcome else {
        panic!("expected finalization");
    };
    assert_eq!(receipt.upserted, 1);

    let review = backend.inner.review(receipt.review_id).await.unwrap();
    assert!(review.is_finalized());
    let satisfaction = review
        .answers
        .iter()
        .find(|answer| answer.block_id == BlockId(101))
        .expect("satisfaction answer");
    assert_eq!(satisfaction.answer_item_id, Some(OptionId(1001)));
}

#[tokio::test]
async fn reviews_stay_bound_to_the_configuration_they_started_with() {
    let backend = Arc::new(TestBackend::new().await);
    let mut hide_phone = ConfigOverlay::default();
    hide_phone.displays.push(form_spec::ConfigDisplay {
        parent_id: 2003,
        kind: form_spec::DisplayKind::BlockOption,
        hidden: true,
    });
    backend
        .inner
        .save_config_draft("root", hide_phone)
        .await
        .unwrap();
    assert_eq!(backend.inner.publish_config("root").await, Ok(1));

    let pipeline =
        SubmissionPipeline::new(backend.clone(), Arc::new(MemorySession::new()), target());
    let mut collector = collector(&backend).await;
    assert_eq!(collector.form().config_version(), 1);
    collector.select(BlockId(200), OptionId(2002)).unwrap();
    let receipt = pipeline.save_step(&collector.step_batch(1)).await.unwrap();

    backend
        .inner
        .save_config_draft("root", ConfigOverlay::default())
        .await
        .unwrap();
    assert_eq!(backend.inner.publish_config("root").await, Ok(2));

    let outcome = backend
        .upsert_answers(
            receipt.review_id,
            AnswerBatch {
                answers: vec![Answer {
                    block_id: BlockId(200),
                    field_code: "contact_channels".into(),
                    answer_item_id: Some(OptionId(2003)),
                    answer_text: None,
                }],
                retracted: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.rejected[0].code, "option_hidden");

    let review = backend.inner.review(receipt.review_id).await.unwrap();
    assert_eq!(review.config_version, 1);
    let history = backend.inner.history("root").await.unwrap();
    let interpretation =
        form_spec::interpret_review(&review, Arc::new(template()), &history, &AutoLink::default())
            .unwrap();
    assert_eq!(interpretation.config_version, 1);
    assert!(interpretation.answers.is_empty());
}
