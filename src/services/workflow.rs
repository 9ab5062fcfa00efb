use crate::core::config::Config;
use crate::core::error::{Result, WorkflowError};
use crate::core::model::{
    FileUpload, ResultPatch, Story, StoryInput, StoryPayload, WorkflowRequest, WorkflowResult,
};
use crate::core::state::{HistoryEntry, Stage, StageTicket, WorkflowState, WorkflowStore};
use crate::services::backend::{PdfDocument, StoryBackend};
use crate::services::poller::poll_until_ready;
use crate::utils::segments::story_segments;
use crate::utils::timer::cancellable;
use futures_util::future::try_join_all;
use log::{debug, info};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const NO_STORY: &str = "Generate a story first.";
pub const PDF_FILE_NAME: &str = "story.pdf";

/// Drives every user-initiated workflow against the backend and keeps the
/// store consistent. Methods take `&self`, so unrelated workflows can run
/// concurrently on one manager.
pub struct WorkflowManager {
    config: Config,
    backend: Arc<dyn StoryBackend>,
    store: WorkflowStore,
    last_request: Mutex<Option<WorkflowRequest>>,
}

impl WorkflowManager {
    pub fn new(config: Config, backend: Arc<dyn StoryBackend>) -> Self {
        Self {
            config,
            backend,
            store: WorkflowStore::new(),
            last_request: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.store.snapshot()
    }

    /// Runs `call` for `ticket`, recording the outcome's error on the stage.
    async fn run_stage<T>(
        &self,
        ticket: &StageTicket,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match cancellable(&ticket.cancel, call).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.store.fail(ticket, &e);
                Err(e)
            }
        }
    }

    fn complete(&self, ticket: &StageTicket, patch: ResultPatch) -> Result<()> {
        if self.store.succeed(ticket, patch) {
            Ok(())
        } else {
            Err(WorkflowError::Cancelled)
        }
    }

    fn validated<T>(&self, stage: Stage, check: Result<T>) -> Result<T> {
        check.map_err(|e| {
            self.store.reject(stage, &e);
            e
        })
    }

    fn current_document(&self, stage: Stage) -> Result<PdfDocument> {
        let doc = PdfDocument::from_result(&self.store.snapshot().result)
            .ok_or_else(|| WorkflowError::Validation(NO_STORY.to_string()));
        self.validated(stage, doc)
    }

    // --- Story ---

    /// Generates a story, then illustrates it when the backend returned no images.
    ///
    /// A failed illustration pass leaves the story in place; the error is
    /// recorded on the image stage and returned. A call overtaken by a newer
    /// story request returns `Cancelled` and leaves no trace of its images.
    pub async fn generate_story(&self, request: WorkflowRequest) -> Result<WorkflowResult> {
        self.validated(Stage::Story, request.validate())?;
        *self.lock_last_request() = Some(request.clone());

        info!("Generating story for {:?}", request.label());
        let ticket = self.store.begin(Stage::Story);
        let backend = self.backend.as_ref();
        let payload = self
            .run_stage(&ticket, async {
                match &request.input {
                    StoryInput::Prompt(prompt) => {
                        backend
                            .generate_story(
                                prompt.trim(),
                                request.chapter_count,
                                request.max_words_per_chapter,
                            )
                            .await
                    }
                    StoryInput::Image(file) => {
                        backend
                            .generate_story_from_image(
                                file,
                                request.chapter_count,
                                request.max_words_per_chapter,
                            )
                            .await
                    }
                }
            })
            .await?;

        let needs_images = payload.image_urls.is_empty() && self.config.segment_images;
        self.complete(&ticket, payload.clone().into())?;
        info!(
            "Story {:?} ready ({} chapters, {} images)",
            payload.title,
            payload.story.chapters().len(),
            payload.image_urls.len()
        );

        self.store.push_history(HistoryEntry {
            prompt: request.label(),
            title: payload.title.clone(),
            story: payload.story.text(),
            summary: payload.summary.clone(),
            image_urls: payload.image_urls.clone(),
        });

        if needs_images {
            self.illustrate(&ticket, &payload).await?;
        }

        let state = self.store.snapshot();
        if !ticket.is_current(&state) {
            debug!("Story request #{} was superseded", ticket.seq);
            return Err(WorkflowError::Cancelled);
        }
        Ok(state.result)
    }

    /// Repeats the last submitted request, e.g. after a failure.
    pub async fn resubmit(&self) -> Result<WorkflowResult> {
        let request = self.lock_last_request().clone();
        let request = self.validated(
            Stage::Story,
            request.ok_or_else(|| WorkflowError::Validation("Nothing to resubmit.".to_string())),
        )?;
        self.generate_story(request).await
    }

    /// One image per chapter, or one per third of a flat story. Runs under
    /// the story's ticket, so a newer story cancels it.
    async fn illustrate(&self, story: &StageTicket, payload: &StoryPayload) -> Result<Vec<String>> {
        let segments: Vec<String> = match &payload.story {
            Story::Flat(text) => story_segments(text),
            Story::Chapters(chapters) => chapters.iter().map(|c| c.text.clone()).collect(),
        };
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        info!("Generating {} illustrations", segments.len());
        let ticket = self.store.begin_within(Stage::Image, story);
        let calls = segments.iter().map(|s| self.backend.regenerate_image(s));
        let urls = self.run_stage(&ticket, try_join_all(calls)).await?;

        self.complete(&ticket, ResultPatch {
            image_urls: Some(urls.clone()),
            ..Default::default()
        })?;

        let story_text = payload.story.text();
        self.store.update(|state| {
            if !ticket.is_current(state) {
                return;
            }
            for entry in state.history.iter_mut().filter(|e| e.story == story_text) {
                entry.image_urls = urls.clone();
            }
        });
        Ok(urls)
    }

    pub async fn regenerate_story(&self, instruction: Option<&str>) -> Result<String> {
        let story = self.store.snapshot().result.story;
        let original = self
            .validated(Stage::Story, story.ok_or_else(|| WorkflowError::Validation(NO_STORY.to_string())))?
            .text();
        let instruction = instruction.map(str::trim).filter(|s| !s.is_empty());

        let ticket = self.store.begin(Stage::Story);
        let new_story = self
            .run_stage(&ticket, self.backend.regenerate_story(&original, instruction))
            .await?;

        self.complete(&ticket, ResultPatch {
            story: Some(Story::Flat(new_story.clone())),
            ..Default::default()
        })?;
        self.store.update(|state| {
            for entry in state.history.iter_mut().filter(|e| e.story == original) {
                entry.story = new_story.clone();
            }
        });
        info!("Story regenerated");
        Ok(new_story)
    }

    /// Replaces the image at `index`, drawn from that chapter's text (or the
    /// summary for a flat story). `index` may be one past the last image.
    pub async fn regenerate_image(&self, index: usize) -> Result<String> {
        let result = self.store.snapshot().result;
        let source = self.validated(Stage::Image, image_source(&result, index))?;

        let ticket = self.store.begin(Stage::Image);
        let url = self
            .run_stage(&ticket, self.backend.regenerate_image(&source))
            .await?;

        self.complete(&ticket, ResultPatch {
            image: Some((index, url.clone())),
            ..Default::default()
        })?;
        let summary = result.summary;
        self.store.update(|state| {
            for entry in state.history.iter_mut().filter(|e| e.summary == summary) {
                if index < entry.image_urls.len() {
                    entry.image_urls[index] = url.clone();
                } else {
                    entry.image_urls.resize(index, String::new());
                    entry.image_urls.push(url.clone());
                }
            }
        });
        debug!("Image {} regenerated: {}", index, url);
        Ok(url)
    }

    pub async fn describe_image(&self, image: FileUpload) -> Result<String> {
        self.validated(Stage::Describe, image.validate())?;

        let ticket = self.store.begin(Stage::Describe);
        let description = self
            .run_stage(&ticket, self.backend.describe_image(&image))
            .await?;
        self.complete(&ticket, ResultPatch {
            description: Some(description.clone()),
            ..Default::default()
        })?;
        Ok(description)
    }

    // --- PDF ---

    pub async fn export_pdf(&self) -> Result<Vec<u8>> {
        let doc = self.current_document(Stage::Pdf)?;
        let ticket = self.store.begin(Stage::Pdf);
        let bytes = self.run_stage(&ticket, self.backend.export_pdf(&doc)).await?;
        self.complete(&ticket, ResultPatch::default())?;
        info!("PDF exported ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Exports the PDF and writes it to `<output_folder>/story.pdf`. The pdf
    /// stage succeeds only once the file is on disk.
    pub async fn save_pdf(&self) -> Result<PathBuf> {
        let doc = self.current_document(Stage::Pdf)?;
        let ticket = self.store.begin(Stage::Pdf);
        let bytes = self.run_stage(&ticket, self.backend.export_pdf(&doc)).await?;

        let dir = PathBuf::from(&self.config.output_folder);
        let path = dir.join(PDF_FILE_NAME);
        self.run_stage(&ticket, write_file(&dir, &path, &bytes)).await?;
        self.complete(&ticket, ResultPatch::default())?;
        info!("PDF saved to {}", path.display());
        Ok(path)
    }

    // --- Flipbook ---

    /// Renders a PDF preview and turns it into a hosted flipbook.
    pub async fn create_flipbook(&self) -> Result<String> {
        let doc = self.current_document(Stage::Flipbook)?;
        let ticket = self.store.begin(Stage::Flipbook);

        let preview_url = self.run_stage(&ticket, self.backend.pdf_preview(&doc)).await?;
        self.store.progress(&ticket, ResultPatch {
            pdf_preview_url: Some(preview_url.clone()),
            ..Default::default()
        });

        let flipbook_url = self
            .run_stage(&ticket, self.backend.flipbook_from_url(&preview_url))
            .await?;
        self.complete(&ticket, ResultPatch {
            flipbook_url: Some(flipbook_url.clone()),
            ..Default::default()
        })?;
        info!("Flipbook ready: {}", flipbook_url);
        Ok(flipbook_url)
    }

    /// Uploads the exported PDF as a flipbook job and polls it to completion.
    /// Starts a fresh manual retry budget.
    pub async fn create_flipbook_from_pdf(&self) -> Result<String> {
        self.store.reset_manual_retries();
        self.run_flipbook_job().await
    }

    /// Recreates the flipbook job after a failure. Blocked once
    /// `max_manual_retries` retries were spent since the last submission.
    pub async fn retry_flipbook(&self) -> Result<String> {
        let limit = self.config.max_manual_retries;
        let attempt = self.validated(Stage::Flipbook, self.store.register_manual_retry(limit))?;
        info!("Retrying flipbook creation ({}/{})", attempt, limit);
        self.run_flipbook_job().await
    }

    async fn run_flipbook_job(&self) -> Result<String> {
        let doc = self.current_document(Stage::Flipbook)?;
        let ticket = self.store.begin(Stage::Flipbook);
        self.store.update(|state| state.poll = None);

        let bytes = self.run_stage(&ticket, self.backend.export_pdf(&doc)).await?;
        let pdf = FileUpload::new(PDF_FILE_NAME, "application/pdf", bytes);
        let job = self.run_stage(&ticket, self.backend.flipbook_from_pdf(&pdf)).await?;
        info!("Flipbook job {} submitted", job);

        let store = &self.store;
        let seq = ticket.seq;
        let link = poll_until_ready(
            self.backend.as_ref(),
            &job,
            &self.config.poll,
            &ticket.cancel,
            |poll| {
                store.update(|state| {
                    if state.stage(Stage::Flipbook).seq == seq {
                        state.poll = Some(poll.clone());
                    }
                })
            },
        )
        .await;

        let link = match link {
            Ok(link) => link,
            Err(e) => {
                self.store.fail(&ticket, &e);
                return Err(e);
            }
        };
        self.complete(&ticket, ResultPatch {
            flipbook_url: Some(link.clone()),
            ..Default::default()
        })?;
        Ok(link)
    }

    // --- Session ---

    pub fn delete_history(&self, index: usize) -> Result<HistoryEntry> {
        self.store.delete_history(index)
    }

    /// Cancels everything in flight and forgets all results and input.
    pub fn clear(&self) {
        *self.lock_last_request() = None;
        self.store.reset();
    }

    fn lock_last_request(&self) -> std::sync::MutexGuard<'_, Option<WorkflowRequest>> {
        self.last_request.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn write_file(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let written: std::io::Result<()> = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(path, bytes).await
    }
    .await;
    written.map_err(|e| WorkflowError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn image_source(result: &WorkflowResult, index: usize) -> Result<String> {
    let story = result
        .story
        .as_ref()
        .ok_or_else(|| WorkflowError::Validation(NO_STORY.to_string()))?;
    let out_of_range = || WorkflowError::Validation(format!("No image slot at position {}.", index + 1));

    match story {
        Story::Chapters(chapters) => chapters
            .get(index)
            .map(|c| c.text.clone())
            .ok_or_else(out_of_range),
        Story::Flat(text) => {
            if index > result.image_urls.len() {
                return Err(out_of_range());
            }
            if !result.summary.is_empty() {
                return Ok(result.summary.clone());
            }
            let segments = story_segments(text);
            segments
                .get(index)
                .or_else(|| segments.last())
                .cloned()
                .ok_or_else(out_of_range)
        }
    }
}
