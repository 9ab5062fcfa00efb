use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, Select, Text};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storyweaver::core::config::CONFIG_FILE;
use storyweaver::{
    Config, FileUpload, HttpGateway, PollState, Stage, WorkflowManager, WorkflowRequest,
    WorkflowResult,
};

const ACTIONS: [&str; 12] = [
    "Write a story from a prompt",
    "Write a story from an image",
    "Describe an image",
    "Regenerate story",
    "Regenerate image",
    "Download PDF",
    "Create flipbook",
    "Retry flipbook",
    "Show history",
    "Delete history entry",
    "Clear",
    "Quit",
];

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = if Path::new(CONFIG_FILE).exists() {
        Config::load()?
    } else {
        println!("{} not found, using defaults.", CONFIG_FILE);
        Config::default()
    };
    config.ensure_directories()?;

    let gateway = HttpGateway::new(&config).context("Failed to set up the HTTP client")?;
    let manager = WorkflowManager::new(config, Arc::new(gateway));

    println!("Open AI Story Generator");
    println!("*The prompt should start like this: 'Tell me a story,' 'Write a story,' or 'Create a story.'");

    loop {
        let action = match Select::new("What next?", ACTIONS.to_vec()).prompt() {
            Ok(a) => a,
            Err(_) => break,
        };

        match action {
            "Write a story from a prompt" => {
                let prompt = Text::new("Story prompt:").prompt()?;
                let (chapters, words) = ask_chapter_params(manager.config())?;
                let request = WorkflowRequest::from_prompt(prompt, chapters, words);
                let out = with_spinner("Writing story...", manager.generate_story(request)).await;
                report(&manager, Stage::Story, out.map(|r| render(&r)));
            }
            "Write a story from an image" => {
                let file = ask_image().await?;
                let (chapters, words) = ask_chapter_params(manager.config())?;
                let request = WorkflowRequest::from_image(file, chapters, words);
                let out = with_spinner("Writing story...", manager.generate_story(request)).await;
                report(&manager, Stage::Story, out.map(|r| render(&r)));
            }
            "Describe an image" => {
                let file = ask_image().await?;
                let out = with_spinner("Describing image...", manager.describe_image(file)).await;
                report(&manager, Stage::Describe, out.map(|d| {
                    println!("Generated Story based on Image:\n{}", d)
                }));
            }
            "Regenerate story" => {
                let extra = Text::new("Extra instruction (optional):").prompt()?;
                let out = with_spinner(
                    "Rewriting story...",
                    manager.regenerate_story(Some(extra.as_str())),
                )
                .await;
                report(&manager, Stage::Story, out.map(|s| println!("{}", s)));
            }
            "Regenerate image" => {
                let index = CustomType::<usize>::new("Image number:")
                    .with_default(1)
                    .prompt()?;
                let out = with_spinner(
                    "Drawing image...",
                    manager.regenerate_image(index.saturating_sub(1)),
                )
                .await;
                report(&manager, Stage::Image, out.map(|u| println!("New image: {}", u)));
            }
            "Download PDF" => {
                let out = with_spinner("Exporting PDF...", manager.save_pdf()).await;
                report(&manager, Stage::Pdf, out.map(|p| println!("Saved {}", p.display())));
            }
            "Create flipbook" => {
                let upload = Confirm::new("Upload the PDF and wait for the flipbook job?")
                    .with_default(false)
                    .prompt()?;
                let out = if upload {
                    with_poll_spinner(&manager, manager.create_flipbook_from_pdf()).await
                } else {
                    with_spinner("Creating flipbook...", manager.create_flipbook()).await
                };
                report(&manager, Stage::Flipbook, out.map(|u| println!("Flipbook: {}", u)));
            }
            "Retry flipbook" => {
                let out = with_poll_spinner(&manager, manager.retry_flipbook()).await;
                report(&manager, Stage::Flipbook, out.map(|u| println!("Flipbook: {}", u)));
            }
            "Show history" => {
                for (i, entry) in manager.snapshot().history.iter().enumerate() {
                    println!("{}. Prompt: {}", i + 1, entry.prompt);
                    println!("   Story Name: {}", entry.title);
                    println!("   Images: {}", entry.image_urls.len());
                }
            }
            "Delete history entry" => {
                let index = CustomType::<usize>::new("Entry number:").prompt()?;
                if let Err(e) = manager.delete_history(index.saturating_sub(1)) {
                    println!("{}", e.user_message());
                }
            }
            "Clear" => {
                manager.clear();
                println!("Cleared.");
            }
            _ => break,
        }
    }

    Ok(())
}

fn ask_chapter_params(config: &Config) -> Result<(u32, u32)> {
    let chapters = CustomType::<u32>::new("Number of chapters:")
        .with_default(config.chapter_count)
        .prompt()?;
    let words = CustomType::<u32>::new("Max words per chapter:")
        .with_default(config.max_words_per_chapter)
        .prompt()?;
    Ok((chapters, words))
}

async fn ask_image() -> Result<FileUpload> {
    let path = Text::new("Image file:").prompt()?;
    let path = Path::new(path.trim());
    if path.as_os_str().is_empty() {
        return Ok(FileUpload::new("", "application/octet-stream", Vec::new()));
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    Ok(FileUpload::new(name, mime, bytes))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

async fn with_spinner<T>(message: &str, fut: impl Future<Output = T>) -> T {
    let pb = spinner(message);
    let out = fut.await;
    pb.finish_and_clear();
    out
}

/// Spinner whose message follows the flipbook job's poll state.
async fn with_poll_spinner<T>(manager: &WorkflowManager, fut: impl Future<Output = T>) -> T {
    let pb = spinner("Creating flipbook...");
    let mut rx = manager.subscribe();
    let watcher = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let message = match &rx.borrow_and_update().poll {
                    Some(PollState::Submitted(job)) => format!("Flipbook job {} submitted", job),
                    Some(PollState::Polling { attempt, max_attempts }) => {
                        format!("Waiting for flipbook ({}/{})...", attempt, max_attempts)
                    }
                    _ => continue,
                };
                pb.set_message(message);
            }
        })
    };
    let out = fut.await;
    watcher.abort();
    pb.finish_and_clear();
    out
}

fn report(manager: &WorkflowManager, stage: Stage, out: storyweaver::Result<()>) {
    if let Err(e) = out {
        let state = manager.snapshot();
        let message = state
            .error(stage)
            .map(str::to_string)
            .unwrap_or_else(|| e.user_message());
        println!("Error: {}", message);
    }
}

fn render(result: &WorkflowResult) {
    println!("\nStory Name: {}\n", result.title);
    match result.story.as_ref().map(|s| s.chapters()) {
        Some(chapters) if !chapters.is_empty() => {
            for (i, chapter) in chapters.iter().enumerate() {
                println!("Chapter {}: {}", chapter.number, chapter.name);
                println!("{}", chapter.text);
                match result.image_at(i) {
                    Some(url) => println!("[image] {}\n", url),
                    None => println!(),
                }
            }
        }
        _ => {
            println!("{}", result.story_text());
            for url in &result.image_urls {
                println!("[image] {}", url);
            }
        }
    }
    if !result.summary.is_empty() {
        println!("\nSummary: {}", result.summary);
    }
}
