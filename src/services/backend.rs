use crate::core::error::Result;
use crate::core::model::{FileUpload, JobHandle, JobStatus, Story, StoryPayload, WorkflowResult};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Content sent to the PDF and preview endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfDocument {
    pub title: String,
    pub story: Story,
    pub image_urls: Vec<String>,
}

impl PdfDocument {
    pub fn from_result(result: &WorkflowResult) -> Option<Self> {
        let story = result.story.clone()?;
        Some(Self {
            title: result.title.clone(),
            story,
            image_urls: result.image_urls.clone(),
        })
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "title": self.title,
            "storyName": self.title,
            "imageUrls": self.image_urls,
        });
        match &self.story {
            Story::Flat(text) => {
                body["story"] = json!(text);
                if let Some(first) = self.image_urls.first() {
                    body["imageUrl"] = json!(first);
                }
            }
            Story::Chapters(chapters) => {
                body["chapters"] = json!(chapters.iter().map(|c| &c.text).collect::<Vec<_>>());
                body["chapterNames"] = json!(chapters.iter().map(|c| &c.name).collect::<Vec<_>>());
            }
        }
        body
    }
}

/// One method per remote endpoint. Implementations classify every failure
/// into a [`crate::WorkflowError`] instead of panicking.
#[async_trait]
pub trait StoryBackend: Send + Sync {
    async fn generate_story(
        &self,
        prompt: &str,
        chapter_count: u32,
        max_words_per_chapter: u32,
    ) -> Result<StoryPayload>;

    async fn generate_story_from_image(
        &self,
        image: &FileUpload,
        chapter_count: u32,
        max_words_per_chapter: u32,
    ) -> Result<StoryPayload>;

    async fn regenerate_story(&self, story: &str, instruction: Option<&str>) -> Result<String>;

    async fn regenerate_image(&self, summary: &str) -> Result<String>;

    async fn describe_image(&self, image: &FileUpload) -> Result<String>;

    async fn export_pdf(&self, document: &PdfDocument) -> Result<Vec<u8>>;

    async fn pdf_preview(&self, document: &PdfDocument) -> Result<String>;

    async fn flipbook_from_url(&self, preview_url: &str) -> Result<String>;

    async fn flipbook_from_pdf(&self, pdf: &FileUpload) -> Result<JobHandle>;

    async fn flipbook_status(&self, job: &JobHandle) -> Result<JobStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Chapter;

    #[test]
    fn test_chaptered_document_body() {
        let doc = PdfDocument {
            title: "Fox".into(),
            story: Story::Chapters(vec![
                Chapter { number: 1, name: "One".into(), text: "a".into() },
                Chapter { number: 2, name: "Two".into(), text: "b".into() },
            ]),
            image_urls: vec!["u1".into()],
        };
        let body = doc.to_json();
        assert_eq!(body["chapters"], json!(["a", "b"]));
        assert_eq!(body["chapterNames"], json!(["One", "Two"]));
        assert_eq!(body["title"], "Fox");
        assert!(body.get("story").is_none());
    }

    #[test]
    fn test_flat_document_body() {
        let doc = PdfDocument {
            title: "Tale".into(),
            story: Story::Flat("text".into()),
            image_urls: vec!["u1".into()],
        };
        let body = doc.to_json();
        assert_eq!(body["story"], "text");
        assert_eq!(body["imageUrl"], "u1");
        assert_eq!(body["storyName"], "Tale");
    }
}
