//! Parsed chapter — the pipeline's text input artifact
//!
//! The pipeline proper consumes `parsed_chapter.json`; the markdown
//! converter here is a runner convenience for feeding raw chapter files
//! straight into an ingest run.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// One contiguous block of prose (a heading or a paragraph).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterBlock {
    pub index: usize,
    pub text: String,
}

/// A chapter reduced to ordered text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedChapter {
    pub chapter_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub blocks: Vec<ChapterBlock>,
    pub word_count: usize,
}

impl ParsedChapter {
    /// Convert markdown source into block form. The first heading becomes
    /// the title; headings and paragraphs each become one block.
    pub fn from_markdown(chapter_id: impl Into<String>, source: &str) -> Self {
        let mut blocks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut title: Option<String> = None;
        let mut in_heading = false;

        let mut flush = |current: &mut String, blocks: &mut Vec<String>| {
            let text = current.trim().to_string();
            if !text.is_empty() {
                blocks.push(text);
            }
            current.clear();
        };

        for event in Parser::new(source) {
            match event {
                Event::Start(Tag::Heading { .. }) => {
                    flush(&mut current, &mut blocks);
                    in_heading = true;
                }
                Event::End(TagEnd::Heading(_)) => {
                    if in_heading && title.is_none() && !current.trim().is_empty() {
                        title = Some(current.trim().to_string());
                    }
                    flush(&mut current, &mut blocks);
                    in_heading = false;
                }
                Event::Start(Tag::Paragraph) | Event::End(TagEnd::Paragraph) => {
                    flush(&mut current, &mut blocks);
                }
                Event::Text(text) | Event::Code(text) => current.push_str(&text),
                Event::SoftBreak | Event::HardBreak => current.push(' '),
                _ => {}
            }
        }
        flush(&mut current, &mut blocks);

        let word_count = blocks.iter().map(|b| b.split_whitespace().count()).sum();
        Self {
            chapter_id: chapter_id.into(),
            title,
            blocks: blocks
                .into_iter()
                .enumerate()
                .map(|(index, text)| ChapterBlock { index, text })
                .collect(),
            word_count,
        }
    }

    /// All blocks joined into one prompt-ready string.
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
