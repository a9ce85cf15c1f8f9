/// Code Generation and Explanation
///
/// **Core Responsibility:**
/// Produce instrumented programs (full boilerplate or reusable wrapper
/// templates) and human-readable complexity explanations.
///
/// **Seams:**
/// - `CodeGenerator`: boilerplate for one submission, or a template for a
///   normalized signature containing the `{{USER_CODE}}` marker
/// - `Explainer`: prose for a finished measurement
///
/// `GeminiClient` implements both against the Generative Language REST API.
/// Generation is deterministic (temperature 0) and every request carries a
/// timeout.

use async_trait::async_trait;
use bigo_common::config::LlmConfig;
use bigo_common::timing::ParsedTiming;
use bigo_common::Language;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transformer::USER_CODE_MARKER;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an empty response")]
    Empty,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("no built-in instrumentation for {0}")]
    Unsupported(Language),

    #[error("{0}")]
    Remote(String),
}

/// Inputs for an explanation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComplexityMetrics {
    pub estimated_complexity: Option<String>,
    pub small_time: Option<f64>,
    pub medium_time: Option<f64>,
    pub large_time: Option<f64>,
    pub ratio1: Option<f64>,
    pub ratio2: Option<f64>,
}

impl ComplexityMetrics {
    pub fn from_timing(timing: &ParsedTiming, estimated_complexity: &str) -> Self {
        Self {
            estimated_complexity: Some(estimated_complexity.to_string()),
            small_time: Some(timing.small),
            medium_time: Some(timing.medium),
            large_time: Some(timing.large),
            ratio1: Some(timing.ratio1()),
            ratio2: Some(timing.ratio2()),
        }
    }

    /// Single-run measurement (no doubling experiment)
    pub fn single_run(duration_ms: f64) -> Self {
        Self {
            small_time: Some(duration_ms),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Full instrumented program for `code`, printing `*_TIME=` markers
    async fn generate_boilerplate(&self, language: Language, code: &str) -> Result<String, GenerationError>;

    /// Reusable template for a normalized signature, printing `LABEL:` markers
    async fn generate_wrapper(&self, signature: &str) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, code: &str, metrics: &ComplexityMetrics) -> Result<String, GenerationError>;
}

/// Split `language:param->ret`
pub fn parse_signature(signature: &str) -> Result<(Language, &str, &str), GenerationError> {
    let malformed = || GenerationError::MalformedSignature(signature.to_string());
    let (language, rest) = signature.split_once(':').ok_or_else(malformed)?;
    let (param, ret) = rest.split_once("->").ok_or_else(malformed)?;
    let language = language.parse::<Language>().map_err(|_| malformed())?;
    Ok((language, param, ret))
}

/// Generative Language API client
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl GeminiClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }

    async fn complete(&self, prompt: &str, temperature: Option<f32>) -> Result<String, GenerationError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if let Some(t) = temperature {
            body["generationConfig"] = json!({ "temperature": t });
        }

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling model");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed.text().ok_or(GenerationError::Empty)
    }

    async fn complete_code(&self, prompt: &str) -> Result<String, GenerationError> {
        let text = self.complete(prompt, Some(0.0)).await?;
        let code = strip_code_fences(&text);
        if code.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(code)
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate_boilerplate(&self, language: Language, code: &str) -> Result<String, GenerationError> {
        self.complete_code(&boilerplate_prompt(language, code)).await
    }

    async fn generate_wrapper(&self, signature: &str) -> Result<String, GenerationError> {
        let (language, param, ret) = parse_signature(signature)?;
        self.complete_code(&wrapper_prompt(language, param, ret)).await
    }
}

#[async_trait]
impl Explainer for GeminiClient {
    /// Never fails: a broken model call degrades to a canned explanation
    async fn explain(&self, code: &str, metrics: &ComplexityMetrics) -> Result<String, GenerationError> {
        match self.complete(&explain_prompt(code, metrics), None).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "Explanation request failed, using fallback");
                Ok(fallback_explanation(metrics, &e))
            }
        }
    }
}

/// Deterministic explanation built from the measurements alone
pub struct TemplateExplainer;

#[async_trait]
impl Explainer for TemplateExplainer {
    async fn explain(&self, _code: &str, metrics: &ComplexityMetrics) -> Result<String, GenerationError> {
        Ok(describe(metrics))
    }
}

fn describe(metrics: &ComplexityMetrics) -> String {
    match (&metrics.estimated_complexity, metrics.ratio1, metrics.ratio2) {
        (Some(label), Some(r1), Some(r2)) => format!(
            "The estimated complexity is {}. Doubling the input from 1000 to 2000 changed the runtime by a factor of {:.2}, and from 2000 to 4000 by {:.2}.",
            label, r1, r2
        ),
        (Some(label), _, _) => format!("The estimated complexity is {}.", label),
        (None, _, _) => match metrics.small_time {
            Some(ms) => format!(
                "The program ran once in {:.0}ms; no growth measurement was taken.",
                ms
            ),
            None => "No timing information was collected.".to_string(),
        },
    }
}

fn fallback_explanation(metrics: &ComplexityMetrics, error: &GenerationError) -> String {
    format!("AI explanation unavailable ({}). {}", error, describe(metrics))
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => "",
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

fn timer_hint(language: Language) -> &'static str {
    match language {
        Language::Python => "time.perf_counter()",
        Language::JavaScript => "process.hrtime.bigint()",
        Language::Java => "System.nanoTime()",
        Language::C => "clock_gettime(CLOCK_MONOTONIC, ...)",
        Language::Cpp => "std::chrono::steady_clock",
    }
}

fn boilerplate_prompt(language: Language, code: &str) -> String {
    format!(
        "You are instrumenting a {lang} program to measure how its running time grows.\n\
         Return ONLY a complete, runnable {lang} program, with no explanation and no markdown.\n\
         Requirements:\n\
         - Include the user's code below unchanged.\n\
         - Identify its main function and generate suitable inputs of size 1000, 2000 and 4000.\n\
         - Time each call with {timer} and print exactly these lines, values in microseconds:\n\
           SMALL_TIME=<microseconds>\n\
           MEDIUM_TIME=<microseconds>\n\
           LARGE_TIME=<microseconds>\n\
         - Print nothing else that contains these markers.\n\n\
         User code:\n{code}\n",
        lang = language,
        timer = timer_hint(language),
        code = code,
    )
}

fn wrapper_prompt(language: Language, param: &str, ret: &str) -> String {
    format!(
        "Write a reusable {lang} benchmarking harness for a class `Solution` with a method \
         `solve(input: {param}) -> {ret}`.\n\
         Return ONLY {lang} source, with no explanation and no markdown.\n\
         Requirements:\n\
         - Place the literal line {marker} where the user's class definition goes; do not define Solution yourself.\n\
         - Build inputs of type {param} with sizes 1000, 2000 and 4000.\n\
         - Time each solve call with {timer} and print, in seconds:\n\
           SMALL: <seconds>\n\
           MEDIUM: <seconds>\n\
           LARGE: <seconds>\n",
        lang = language,
        param = param,
        ret = ret,
        marker = USER_CODE_MARKER,
        timer = timer_hint(language),
    )
}

fn explain_prompt(code: &str, metrics: &ComplexityMetrics) -> String {
    let metrics = serde_json::to_string_pretty(metrics).unwrap_or_default();
    format!(
        "Explain the time complexity of the following code in two or three sentences.\n\
         Empirical measurements (times in microseconds, ratios between doubled input sizes):\n\
         {metrics}\n\n\
         Code:\n{code}\n",
        metrics = metrics,
        code = code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(strip_code_fences("  ```\nx = 1\n```  \n"), "x = 1");
        assert_eq!(strip_code_fences("print(1)"), "print(1)");
        assert_eq!(strip_code_fences("```"), "");
    }

    #[test]
    fn test_parse_signature() {
        let (language, param, ret) = parse_signature("python:List[int]->int").unwrap();
        assert_eq!(language, Language::Python);
        assert_eq!(param, "List[int]");
        assert_eq!(ret, "int");

        let (language, param, ret) = parse_signature("javascript:any->any").unwrap();
        assert_eq!(language, Language::JavaScript);
        assert_eq!((param, ret), ("any", "any"));

        assert!(matches!(
            parse_signature("cobol:int->int"),
            Err(GenerationError::MalformedSignature(_))
        ));
        assert!(parse_signature("python:int").is_err());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"def "},{"text":"f(): pass"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("def f(): pass"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.text().is_none());
    }

    #[test]
    fn test_wrapper_prompt_mentions_marker() {
        let prompt = wrapper_prompt(Language::JavaScript, "any", "any");
        assert!(prompt.contains(USER_CODE_MARKER));
        assert!(prompt.contains("SMALL: <seconds>"));
    }

    #[tokio::test]
    async fn test_template_explainer() {
        let timing = ParsedTiming {
            small: 100.0,
            medium: 200.0,
            large: 400.0,
        };
        let metrics = ComplexityMetrics::from_timing(&timing, "O(n) or O(n log n)");
        let text = TemplateExplainer.explain("code", &metrics).await.unwrap();
        assert!(text.starts_with("The estimated complexity is O(n) or O(n log n)."));
        assert!(text.contains("2.00"));

        let single = TemplateExplainer
            .explain("code", &ComplexityMetrics::single_run(12.0))
            .await
            .unwrap();
        assert!(single.contains("12ms"));
    }

    #[test]
    fn test_fallback_explanation_includes_error() {
        let metrics = ComplexityMetrics {
            estimated_complexity: Some("O(n^2)".to_string()),
            ..Default::default()
        };
        let text = fallback_explanation(&metrics, &GenerationError::Empty);
        assert!(text.contains("empty response"));
        assert!(text.contains("O(n^2)"));
    }
}
