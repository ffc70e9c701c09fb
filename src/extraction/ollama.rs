//! LLM-based entity extraction through Ollama `/api/generate`.

use serde::{Deserialize, Serialize};

use super::{EntityExtractor, ExtractedEntity, ExtractedRelation, Extraction};
use crate::embeddings::provider::{malformed_response, request_error, status_error};
use crate::error::Result;

const PROVIDER: &str = "ollama-extractor";

/// Longer inputs are cut (on a char boundary) before prompting.
const MAX_PROMPT_TEXT: usize = 8_000;

/// LLM extractor using a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Expected JSON output format from the LLM.
#[derive(Debug, Deserialize)]
struct LlmOutput {
    #[serde(default)]
    entities: Vec<LlmEntity>,
    #[serde(default)]
    relations: Vec<LlmRelation>,
}

#[derive(Debug, Deserialize)]
struct LlmEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LlmRelation {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relationship_type: String,
    confidence: Option<f64>,
}

impl OllamaExtractor {
    #[must_use]
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn build_prompt(text: &str) -> String {
        let mut cut = text.len().min(MAX_PROMPT_TEXT);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let text = &text[..cut];

        format!(
            r#"You extract a knowledge graph from text.
Output ONLY valid JSON, no explanation or markdown.

Entity types: PERSON, ORG, PLACE, PRODUCT, TECHNOLOGY, FILE, CONCEPT, EVENT.
Relation types are short snake_case verbs such as works_at, uses, depends_on, located_in.

Text:
"""
{text}
"""

Output this exact JSON structure:
{{"entities":[{{"name":"Alice","type":"PERSON","confidence":0.9}}],"relations":[{{"source":"Alice","target":"Acme","type":"works_at","confidence":0.8}}]}}"#
        )
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 1024,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| malformed_response(PROVIDER, e))?;
        Ok(data.response)
    }
}

/// Parse the model's reply into an [`Extraction`].
///
/// # Errors
///
/// Returns `PermanentProcessing` if no JSON object can be parsed.
fn parse_output(output: &str) -> Result<Extraction> {
    let json = extract_json(output);
    let parsed: LlmOutput =
        serde_json::from_str(json).map_err(|e| malformed_response(PROVIDER, e))?;

    let clamp = |c: Option<f64>, default: f64| c.unwrap_or(default).clamp(0.0, 1.0);

    Ok(Extraction {
        entities: parsed
            .entities
            .into_iter()
            .filter(|e| !e.name.trim().is_empty() && !e.entity_type.trim().is_empty())
            .map(|e| ExtractedEntity::new(&e.entity_type, &e.name, clamp(e.confidence, 0.7)))
            .collect(),
        relations: parsed
            .relations
            .into_iter()
            .map(|r| ExtractedRelation {
                source: r.source,
                target: r.target,
                relationship_type: r.relationship_type.replace(' ', "_"),
                confidence: clamp(r.confidence, 0.5),
            })
            .collect(),
    })
}

/// Strip code fences and return the first balanced `{...}` object.
fn extract_json(output: &str) -> &str {
    let cleaned = output
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let Some(start) = cleaned.find('{') else {
        return cleaned;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in cleaned[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &cleaned[start..=start + i];
                }
            }
            _ => {}
        }
    }
    &cleaned[start..]
}

impl EntityExtractor for OllamaExtractor {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        if text.trim().is_empty() {
            return Ok(Extraction::default());
        }
        let output = self.generate(Self::build_prompt(text)).await?;
        let extraction = parse_output(&output)?;
        tracing::debug!(
            model = %self.model,
            entities = extraction.entities.len(),
            relations = extraction.relations.len(),
            "LLM extraction complete"
        );
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_strips_fences_and_trailing_text() {
        let raw = "```json\n{\"entities\":[{\"name\":\"a}\",\"type\":\"X\"}]} trailing\n```";
        assert_eq!(extract_json(raw), "{\"entities\":[{\"name\":\"a}\",\"type\":\"X\"}]}");
    }

    #[test]
    fn test_parse_output() {
        let output = r#"{"entities":[{"name":"Alice","type":"person","confidence":1.4},{"name":" ","type":"ORG"}],
                         "relations":[{"source":"Alice","target":"Acme","type":"works at"}]}"#;
        let extraction = parse_output(output).unwrap();
        assert_eq!(extraction.entities.len(), 1);
        assert_eq!(extraction.entities[0].entity_type, "PERSON");
        assert!((extraction.entities[0].confidence - 1.0).abs() < 1e-9);
        assert_eq!(extraction.relations[0].relationship_type, "works_at");
        assert!((extraction.relations[0].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_is_permanent() {
        let err = parse_output("I cannot help with that").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_prompt_truncates_on_char_boundary() {
        let text = "é".repeat(MAX_PROMPT_TEXT);
        let prompt = OllamaExtractor::build_prompt(&text);
        assert!(prompt.len() < text.len() + 1_000);
    }
}
