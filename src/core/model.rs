use crate::core::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const NO_FILE_SELECTED: &str = "Please select an image file.";

// --- Requests ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(WorkflowError::Validation(NO_FILE_SELECTED.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryInput {
    Prompt(String),
    Image(FileUpload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub input: StoryInput,
    pub chapter_count: u32,
    pub max_words_per_chapter: u32,
}

impl WorkflowRequest {
    pub fn from_prompt(prompt: impl Into<String>, chapter_count: u32, max_words_per_chapter: u32) -> Self {
        Self {
            input: StoryInput::Prompt(prompt.into()),
            chapter_count,
            max_words_per_chapter,
        }
    }

    pub fn from_image(file: FileUpload, chapter_count: u32, max_words_per_chapter: u32) -> Self {
        Self {
            input: StoryInput::Image(file),
            chapter_count,
            max_words_per_chapter,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.input {
            StoryInput::Prompt(prompt) if prompt.trim().is_empty() => {
                return Err(WorkflowError::Validation("Please enter a story prompt.".to_string()));
            }
            StoryInput::Prompt(_) => {}
            StoryInput::Image(file) => file.validate()?,
        }
        if self.chapter_count == 0 {
            return Err(WorkflowError::Validation(
                "Chapter count must be at least 1.".to_string(),
            ));
        }
        if self.max_words_per_chapter == 0 {
            return Err(WorkflowError::Validation(
                "Max words per chapter must be at least 1.".to_string(),
            ));
        }
        Ok(())
    }

    /// Short label used in history entries and logs.
    pub fn label(&self) -> String {
        match &self.input {
            StoryInput::Prompt(prompt) => prompt.trim().to_string(),
            StoryInput::Image(file) => format!("[image] {}", file.file_name),
        }
    }
}

// --- Results ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: u32,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Story {
    Flat(String),
    Chapters(Vec<Chapter>),
}

impl Story {
    pub fn text(&self) -> String {
        match self {
            Story::Flat(text) => text.clone(),
            Story::Chapters(chapters) => chapters
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn chapters(&self) -> &[Chapter] {
        match self {
            Story::Flat(_) => &[],
            Story::Chapters(chapters) => chapters,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub title: String,
    pub story: Option<Story>,
    pub summary: String,
    pub image_urls: Vec<String>,
    pub description: Option<String>,
    pub pdf_preview_url: Option<String>,
    pub flipbook_url: Option<String>,
}

impl WorkflowResult {
    /// Image correlated with chapter `index`. Missing images are normal.
    pub fn image_at(&self, index: usize) -> Option<&str> {
        self.image_urls.get(index).map(String::as_str).filter(|u| !u.is_empty())
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.story.as_ref().and_then(|s| s.chapters().get(index))
    }

    pub fn story_text(&self) -> String {
        self.story.as_ref().map(Story::text).unwrap_or_default()
    }

    pub fn merge(&mut self, patch: ResultPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(story) = patch.story {
            self.story = Some(story);
        }
        if let Some(summary) = patch.summary {
            self.summary = summary;
        }
        if let Some(urls) = patch.image_urls {
            self.image_urls = urls;
        }
        if let Some((index, url)) = patch.image {
            if index < self.image_urls.len() {
                self.image_urls[index] = url;
            } else {
                self.image_urls.resize(index, String::new());
                self.image_urls.push(url);
            }
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(url) = patch.pdf_preview_url {
            self.pdf_preview_url = Some(url);
        }
        if let Some(url) = patch.flipbook_url {
            self.flipbook_url = Some(url);
        }
    }
}

/// Fields a successful stage overwrites; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPatch {
    pub title: Option<String>,
    pub story: Option<Story>,
    pub summary: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub image: Option<(usize, String)>,
    pub description: Option<String>,
    pub pdf_preview_url: Option<String>,
    pub flipbook_url: Option<String>,
}

impl From<StoryPayload> for ResultPatch {
    fn from(payload: StoryPayload) -> Self {
        ResultPatch {
            title: Some(payload.title),
            story: Some(payload.story),
            summary: Some(payload.summary),
            image_urls: Some(payload.image_urls),
            ..Default::default()
        }
    }
}

// --- Story response decoding ---

/// Story as returned by the generation endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPayload {
    pub title: String,
    pub story: Story,
    pub summary: String,
    pub image_urls: Vec<String>,
}

impl StoryPayload {
    /// Accepts the `chapters[]` array shape, the numbered `chapterN` shape and
    /// the flat `story` shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| WorkflowError::MalformedResponse("story response is not an object".into()))?;

        let str_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        let title = str_field("title")
            .or_else(|| str_field("storyName"))
            .unwrap_or_default();
        let summary = str_field("summary").unwrap_or_default();

        let mut image_urls: Vec<String> = match obj.get("imageUrls") {
            Some(Value::Array(urls)) => urls
                .iter()
                .map(|u| u.as_str().unwrap_or_default().to_string())
                .collect(),
            _ => Vec::new(),
        };
        if image_urls.is_empty() {
            if let Some(url) = str_field("imageUrl").filter(|u| !u.is_empty()) {
                image_urls.push(url);
            }
        }

        let story = if let Some(Value::Array(texts)) = obj.get("chapters") {
            let names: Vec<String> = match obj.get("chapterNames") {
                Some(Value::Array(names)) => names
                    .iter()
                    .map(|n| n.as_str().unwrap_or_default().to_string())
                    .collect(),
                _ => Vec::new(),
            };
            let chapters = texts
                .iter()
                .enumerate()
                .map(|(i, text)| -> Result<Chapter> {
                    let text = text.as_str().ok_or_else(|| {
                        WorkflowError::MalformedResponse(format!("chapter {} is not text", i + 1))
                    })?;
                    Ok(Chapter {
                        number: i as u32 + 1,
                        name: names.get(i).cloned().unwrap_or_else(|| format!("Chapter {}", i + 1)),
                        text: text.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Story::Chapters(chapters)
        } else if obj.contains_key("chapter1") {
            let mut chapters = Vec::new();
            let mut n = 1u32;
            while let Some(text) = str_field(&format!("chapter{}", n)) {
                let name = str_field(&format!("chapter{}Name", n))
                    .unwrap_or_else(|| format!("Chapter {}", n));
                chapters.push(Chapter { number: n, name, text });
                n += 1;
            }
            Story::Chapters(chapters)
        } else if let Some(text) = str_field("story") {
            Story::Flat(text)
        } else {
            return Err(WorkflowError::MalformedResponse(
                "story response contains no story text".into(),
            ));
        };

        if let Story::Chapters(chapters) = &story {
            if chapters.is_empty() {
                return Err(WorkflowError::MalformedResponse(
                    "story response contains no chapters".into(),
                ));
            }
        }

        Ok(Self {
            title,
            story,
            summary,
            image_urls,
        })
    }
}

// --- Jobs ---

/// Opaque key of a long-running server-side job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready(String),
    Error(String),
}

impl JobStatus {
    pub fn from_value(value: &Value) -> Result<Self> {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkflowError::MalformedResponse("status field missing".into()))?;

        let details = match value.get("details") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        match status {
            "Ready" => {
                let link = ["flipbookUrl", "url"]
                    .iter()
                    .find_map(|k| value.get(*k).and_then(Value::as_str).map(str::to_string))
                    .or(details)
                    .ok_or_else(|| {
                        WorkflowError::MalformedResponse("ready status carries no link".into())
                    })?;
                Ok(JobStatus::Ready(link))
            }
            "Pending" => Ok(JobStatus::Pending),
            "Error" => Ok(JobStatus::Error(details.unwrap_or_default())),
            other => Err(WorkflowError::MalformedResponse(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// Observable progress of a poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    Submitted(JobHandle),
    Polling { attempt: u32, max_attempts: u32 },
    Ready(String),
    Error(String),
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_prompt_is_rejected() {
        let req = WorkflowRequest::from_prompt("   ", 2, 300);
        assert_eq!(
            req.validate(),
            Err(WorkflowError::Validation("Please enter a story prompt.".into()))
        );
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let req = WorkflowRequest::from_image(FileUpload::new("cat.png", "image/png", vec![]), 1, 100);
        assert_eq!(
            req.validate(),
            Err(WorkflowError::Validation(NO_FILE_SELECTED.into()))
        );
    }

    #[test]
    fn test_decode_numbered_chapters() {
        let value = json!({
            "chapter1": "The fox woke.",
            "chapter1Name": "Morning",
            "chapter2": "The fox slept.",
            "chapter2Name": "Night",
            "summary": "A fox's day",
            "imageUrls": ["u1", "u2"],
            "title": "The Fox's Journey"
        });
        let payload = StoryPayload::from_value(&value).unwrap();
        assert_eq!(payload.title, "The Fox's Journey");
        let chapters = payload.story.chapters();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].name, "Night");
        assert_eq!(chapters[1].number, 2);
        assert_eq!(payload.image_urls, vec!["u1", "u2"]);
    }

    #[test]
    fn test_decode_chapter_array_with_missing_names() {
        let value = json!({
            "chapters": ["a", "b", "c"],
            "chapterNames": ["First"],
            "summary": "s",
            "imageUrls": ["u1"],
            "title": "t"
        });
        let payload = StoryPayload::from_value(&value).unwrap();
        let chapters = payload.story.chapters();
        assert_eq!(chapters[0].name, "First");
        assert_eq!(chapters[2].name, "Chapter 3");
    }

    #[test]
    fn test_decode_flat_story() {
        let value = json!({
            "story": "Once upon a time",
            "storyName": "Tale",
            "summary": "short",
            "imageUrl": "http://img/1.png"
        });
        let payload = StoryPayload::from_value(&value).unwrap();
        assert_eq!(payload.story, Story::Flat("Once upon a time".into()));
        assert_eq!(payload.title, "Tale");
        assert_eq!(payload.image_urls, vec!["http://img/1.png"]);
    }

    #[test]
    fn test_decode_without_story_is_malformed() {
        let err = StoryPayload::from_value(&json!({ "summary": "x" })).unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedResponse(_)));
    }

    #[test]
    fn test_image_at_tolerates_missing_images() {
        let mut result = WorkflowResult::default();
        result.merge(ResultPatch {
            image_urls: Some(vec!["u1".into()]),
            ..Default::default()
        });
        assert_eq!(result.image_at(0), Some("u1"));
        assert_eq!(result.image_at(1), None);

        result.merge(ResultPatch {
            image: Some((2, "u3".into())),
            ..Default::default()
        });
        assert_eq!(result.image_at(1), None);
        assert_eq!(result.image_at(2), Some("u3"));
    }

    #[test]
    fn test_job_status_decoding() {
        assert_eq!(JobStatus::from_value(&json!({"status": "Pending"})).unwrap(), JobStatus::Pending);
        assert_eq!(
            JobStatus::from_value(&json!({"status": "Ready", "details": "https://flip/1"})).unwrap(),
            JobStatus::Ready("https://flip/1".into())
        );
        assert_eq!(
            JobStatus::from_value(&json!({"status": "Error", "details": "bad pdf"})).unwrap(),
            JobStatus::Error("bad pdf".into())
        );
        assert!(JobStatus::from_value(&json!({"status": "Weird"})).is_err());
    }
}
