//! Scripted in-memory backend shared by the unit tests.

use crate::core::error::{Result, WorkflowError};
use crate::core::model::{FileUpload, JobHandle, JobStatus, StoryPayload};
use crate::services::backend::{PdfDocument, StoryBackend};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct MockBackend {
    stories: Mutex<VecDeque<Result<StoryPayload>>>,
    images: Mutex<VecDeque<(Duration, Result<String>)>>,
    statuses: Mutex<VecDeque<Result<JobStatus>>>,
    jobs: Mutex<VecDeque<Result<JobHandle>>>,
    pdfs: Mutex<VecDeque<Result<Vec<u8>>>>,
    calls: Mutex<Vec<String>>,
    image_prompts: Mutex<Vec<String>>,
    status_times: Mutex<Vec<Instant>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stories(self, stories: Vec<Result<StoryPayload>>) -> Self {
        self.stories.lock().unwrap().extend(stories);
        self
    }

    pub fn with_images(self, images: Vec<(Duration, Result<String>)>) -> Self {
        self.images.lock().unwrap().extend(images);
        self
    }

    pub fn with_statuses(self, statuses: Vec<Result<JobStatus>>) -> Self {
        self.statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn with_jobs(self, jobs: Vec<Result<JobHandle>>) -> Self {
        self.jobs.lock().unwrap().extend(jobs);
        self
    }

    pub fn with_pdfs(self, pdfs: Vec<Result<Vec<u8>>>) -> Self {
        self.pdfs.lock().unwrap().extend(pdfs);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }

    pub fn status_times(&self) -> Vec<Instant> {
        self.status_times.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl StoryBackend for MockBackend {
    async fn generate_story(&self, _prompt: &str, _chapters: u32, _words: u32) -> Result<StoryPayload> {
        self.record("generate_story");
        self.stories.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(WorkflowError::Server {
                status: 500,
                message: "no story scripted".into(),
            })
        })
    }

    async fn generate_story_from_image(
        &self,
        _image: &FileUpload,
        _chapters: u32,
        _words: u32,
    ) -> Result<StoryPayload> {
        self.record("generate_story_from_image");
        self.stories.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(WorkflowError::Server {
                status: 500,
                message: "no story scripted".into(),
            })
        })
    }

    async fn regenerate_story(&self, story: &str, instruction: Option<&str>) -> Result<String> {
        self.record("regenerate_story");
        Ok(match instruction {
            Some(extra) => format!("{} ({})", story, extra),
            None => format!("{} (rewritten)", story),
        })
    }

    async fn regenerate_image(&self, summary: &str) -> Result<String> {
        let n = {
            let mut prompts = self.image_prompts.lock().unwrap();
            prompts.push(summary.to_string());
            prompts.len()
        };
        self.record("regenerate_image");
        let scripted = self.images.lock().unwrap().pop_front();
        match scripted {
            Some((wait, out)) => {
                tokio::time::sleep(wait).await;
                out
            }
            None => Ok(format!("https://img/{}", n)),
        }
    }

    async fn describe_image(&self, _image: &FileUpload) -> Result<String> {
        self.record("describe_image");
        Ok("A cat sitting on a windowsill".to_string())
    }

    async fn export_pdf(&self, _document: &PdfDocument) -> Result<Vec<u8>> {
        self.record("export_pdf");
        self.pdfs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(b"%PDF-1.4 mock".to_vec()))
    }

    async fn pdf_preview(&self, _document: &PdfDocument) -> Result<String> {
        self.record("pdf_preview");
        Ok("https://preview/1".to_string())
    }

    async fn flipbook_from_url(&self, preview_url: &str) -> Result<String> {
        self.record("flipbook_from_url");
        Ok(format!("https://flip/from?{}", preview_url))
    }

    async fn flipbook_from_pdf(&self, _pdf: &FileUpload) -> Result<JobHandle> {
        self.record("flipbook_from_pdf");
        self.jobs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(JobHandle("job-1".to_string())))
    }

    async fn flipbook_status(&self, _job: &JobHandle) -> Result<JobStatus> {
        self.record("flipbook_status");
        self.status_times.lock().unwrap().push(Instant::now());
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(JobStatus::Pending))
    }
}
