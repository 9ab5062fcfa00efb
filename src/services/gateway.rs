use crate::core::config::{Config, Endpoints};
use crate::core::error::{Result, WorkflowError};
use crate::core::model::{FileUpload, JobHandle, JobStatus, StoryPayload};
use crate::services::backend::{PdfDocument, StoryBackend};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{multipart, Client, Response};
use serde_json::{json, Value};
use url::Url;

const USER_AGENT: &str = concat!("storyweaver/", env!("CARGO_PKG_VERSION"));

/// `StoryBackend` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl HttpGateway {
    pub fn new(config: &Config) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            WorkflowError::Validation(format!("Invalid base_url {:?}: {}", config.base_url, e))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WorkflowError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoints: config.endpoints.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| WorkflowError::Validation(format!("Invalid endpoint {:?}: {}", raw, e)))
    }

    /// Status URL for `job`. The id fills the `{id}` segment of the template
    /// and is percent-encoded as exactly one path segment.
    fn status_url(&self, job: &JobHandle) -> Result<Url> {
        if matches!(job.0.as_str(), "" | "." | "..") {
            return Err(WorkflowError::MalformedResponse(format!("unusable job id {:?}", job.0)));
        }
        let mut url = self.url("")?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                WorkflowError::Validation(format!("base_url {:?} cannot carry a path", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in self.endpoints.flipbook_status.split('/').filter(|s| !s.is_empty()) {
                if segment == "{id}" {
                    segments.push(&job.0);
                } else {
                    segments.push(segment);
                }
            }
        }
        Ok(url)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path)?;
        debug!("POST {}", url);
        let resp = self.client.post(url).json(body).send().await?;
        read_json(check_status(resp).await?).await
    }

    async fn post_multipart(&self, path: &str, form: multipart::Form) -> Result<Value> {
        let url = self.url(path)?;
        debug!("POST {} (multipart)", url);
        let resp = self.client.post(url).multipart(form).send().await?;
        read_json(check_status(resp).await?).await
    }

    async fn post_for_bytes(&self, path: &str, body: &Value) -> Result<Vec<u8>> {
        let url = self.url(path)?;
        debug!("POST {} (binary response)", url);
        let resp = self.client.post(url).json(body).send().await?;
        let bytes = check_status(resp).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(WorkflowError::MalformedResponse("empty binary response".into()));
        }
        Ok(bytes.to_vec())
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        debug!("GET {}", url);
        let resp = self.client.get(url).send().await?;
        read_json(check_status(resp).await?).await
    }
}

fn file_part(file: &FileUpload) -> Result<multipart::Part> {
    multipart::Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| WorkflowError::Validation(format!("Invalid file type {:?}: {}", file.mime_type, e)))
}

/// Turns a non-2xx response into `WorkflowError::Server`, preferring the
/// message the server put in its body.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = server_message(&body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.trim().to_string()
        }
    });
    warn!("Server responded {}: {}", status, message);
    Err(WorkflowError::Server {
        status: status.as_u16(),
        message,
    })
}

fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.pointer("/error/message").and_then(Value::as_str))
        .map(str::to_string)
}

async fn read_json(resp: Response) -> Result<Value> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        WorkflowError::MalformedResponse(format!("{}. Body: {}", e, text.chars().take(200).collect::<String>()))
    })
}

fn string_field(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WorkflowError::MalformedResponse(format!("missing field `{}`", key)))
}

#[async_trait]
impl StoryBackend for HttpGateway {
    async fn generate_story(
        &self,
        prompt: &str,
        chapter_count: u32,
        max_words_per_chapter: u32,
    ) -> Result<StoryPayload> {
        let body = json!({
            "prompt": prompt,
            "message": prompt,
            "chapterCount": chapter_count,
            "maxWordsPerChapter": max_words_per_chapter,
        });
        let value = self.post_json(&self.endpoints.generate_story, &body).await?;
        StoryPayload::from_value(&value)
    }

    async fn generate_story_from_image(
        &self,
        image: &FileUpload,
        chapter_count: u32,
        max_words_per_chapter: u32,
    ) -> Result<StoryPayload> {
        let form = multipart::Form::new()
            .part("image", file_part(image)?)
            .text("chapterCount", chapter_count.to_string())
            .text("maxWordsPerChapter", max_words_per_chapter.to_string());
        let value = self
            .post_multipart(&self.endpoints.generate_story_from_image, form)
            .await?;
        StoryPayload::from_value(&value)
    }

    async fn regenerate_story(&self, story: &str, instruction: Option<&str>) -> Result<String> {
        let mut body = json!({ "story": story });
        if let Some(instruction) = instruction {
            body["regeneratePrompt"] = json!(instruction);
        }
        let value = self.post_json(&self.endpoints.regenerate_story, &body).await?;
        string_field(&value, "newStory")
    }

    async fn regenerate_image(&self, summary: &str) -> Result<String> {
        let value = self
            .post_json(&self.endpoints.regenerate_image, &json!({ "summary": summary }))
            .await?;
        string_field(&value, "newImageUrl")
    }

    async fn describe_image(&self, image: &FileUpload) -> Result<String> {
        let form = multipart::Form::new().part("image", file_part(image)?);
        let value = self.post_multipart(&self.endpoints.describe_image, form).await?;
        string_field(&value, "description")
    }

    async fn export_pdf(&self, document: &PdfDocument) -> Result<Vec<u8>> {
        self.post_for_bytes(&self.endpoints.export_pdf, &document.to_json())
            .await
    }

    async fn pdf_preview(&self, document: &PdfDocument) -> Result<String> {
        let value = self
            .post_json(&self.endpoints.pdf_preview, &document.to_json())
            .await?;
        string_field(&value, "previewUrl")
    }

    async fn flipbook_from_url(&self, preview_url: &str) -> Result<String> {
        let value = self
            .post_json(&self.endpoints.flipbook_from_url, &json!({ "previewUrl": preview_url }))
            .await?;
        string_field(&value, "flipbookUrl")
    }

    async fn flipbook_from_pdf(&self, pdf: &FileUpload) -> Result<JobHandle> {
        let form = multipart::Form::new().part("pdf", file_part(pdf)?);
        let value = self.post_multipart(&self.endpoints.flipbook_from_pdf, form).await?;
        match value.get("flipbookId") {
            Some(Value::String(id)) => Ok(JobHandle(id.clone())),
            Some(Value::Number(id)) => Ok(JobHandle(id.to_string())),
            _ => Err(WorkflowError::MalformedResponse("missing field `flipbookId`".into())),
        }
    }

    async fn flipbook_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let value = self.get_json(self.status_url(job)?).await?;
        JobStatus::from_value(&value)
    }
}
