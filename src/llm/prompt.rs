//! Prompt construction and response validation for question/answer generation.

use super::types::{QaEnvelope, QaPair};
use crate::content::ExtractedContent;
use crate::error::ValidationError;

/// How many pairs to ask for, scaled by body length in characters.
fn pair_range(body: &str) -> &'static str {
    match body.chars().count() {
        n if n > 2000 => "4-6",
        n if n > 1000 => "3-5",
        _ => "2-4",
    }
}

pub fn build_prompt(content: &ExtractedContent) -> String {
    let terms = if content.terms.is_empty() {
        "none".to_string()
    } else {
        content.terms.join(", ")
    };
    let range = pair_range(&content.body);
    format!(
        "You are an expert editor who turns articles into clear question/answer pairs.\n\
         \n\
         ## Article\n\
         Title: {title}\n\
         Terms: {terms}\n\
         Excerpt: {excerpt}\n\
         \n\
         {body}\n\
         \n\
         ## Task\n\
         - Write {range} question/answer pairs covering the article's key points.\n\
         - Questions must be specific and grounded in the article.\n\
         - Answers must be accurate, complete and 150-400 words, formatted with basic HTML \
           (p, ul, li, h2; never h1 or title), no CSS or Markdown.\n\
         \n\
         Respond with ONLY valid JSON, no other text:\n\
         {{\"qa_pairs\": [{{\"question\": \"...\", \"answer\": \"...\"}}]}}",
        title = content.title,
        excerpt = content.excerpt,
        body = content.body,
    )
}

/// Decodes the model's answer into validated pairs.
pub fn parse_qa_response(text: &str) -> Result<Vec<QaPair>, ValidationError> {
    let envelope: QaEnvelope = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ValidationError::Json(e.to_string()))?;
    let raw = envelope.qa_pairs.ok_or(ValidationError::MissingPairs)?;
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }

    raw.into_iter()
        .enumerate()
        .map(|(index, pair)| {
            let question = pair.question.unwrap_or_default().trim().to_string();
            let answer = pair.answer.unwrap_or_default().trim().to_string();
            if question.is_empty() || answer.is_empty() {
                return Err(ValidationError::EmptyPair { index });
            }
            Ok(QaPair { question, answer })
        })
        .collect()
}

/// Models sometimes wrap JSON in a ```json fence despite being told not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
