/// Language Registry - Per-Language Sandbox Knowledge
///
/// **Core Responsibility:**
/// Map a language tag to everything the pipeline needs to know about it:
/// sandbox file layout, compile/run commands, image override and the
/// structural rule used to derive a normalized signature.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{RegistryError, UnsupportedLanguage};
use crate::types::Language;

/// Structural rule for one language's `Solution.solve` entry point
///
/// Patterns may capture `param` and `ret`; missing captures fall back to
/// the rule defaults.
#[derive(Debug, Clone)]
pub struct SignatureRule {
    pattern: Regex,
    default_param: Option<&'static str>,
    default_return: &'static str,
}

impl SignatureRule {
    fn new(pattern: &str, default_param: Option<&'static str>, default_return: &'static str) -> Self {
        Self {
            // Patterns are compile-time constants covered by tests
            pattern: Regex::new(pattern).expect("built-in signature pattern must compile"),
            default_param,
            default_return,
        }
    }

    /// Returns `(param_type, return_type)` with whitespace stripped
    pub fn extract(&self, code: &str) -> Option<(String, String)> {
        let caps = self.pattern.captures(code)?;
        let param = match caps.name("param") {
            Some(m) => strip_whitespace(m.as_str()),
            None => self.default_param?.to_string(),
        };
        let ret = caps
            .name("ret")
            .map(|m| strip_whitespace(m.as_str()))
            .unwrap_or_else(|| self.default_return.to_string());
        if param.is_empty() {
            return None;
        }
        Some((param, ret))
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Capability bundle for one language
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub language: Language,
    pub source_file: String,
    pub compile_cmd: Option<String>,
    pub run_cmd: String,
    /// Overrides the sandbox default image
    pub image: Option<String>,
    pub signature: SignatureRule,
}

impl LanguageSpec {
    /// Shell script executed inside the sandbox
    pub fn script(&self, with_stdin: bool) -> String {
        let mut script = String::new();
        if let Some(compile) = &self.compile_cmd {
            script.push_str(compile);
            script.push_str(" && ");
        }
        script.push_str(&self.run_cmd);
        if with_stdin {
            script.push_str(" < input.txt");
        }
        script
    }
}

/// Per-language override loaded from JSON
#[derive(Debug, Deserialize)]
struct LanguageOverride {
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    source_file: Option<String>,
    compile_cmd: Option<String>,
    run_cmd: Option<String>,
    image: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

/// Registry populated once at startup
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: HashMap<Language, LanguageSpec>,
}

impl LanguageRegistry {
    /// Built-in table for every supported language
    pub fn builtin() -> Self {
        let specs = Language::all_variants()
            .iter()
            .map(|lang| (*lang, builtin_spec(*lang)))
            .collect();
        Self { specs }
    }

    /// Built-in table with overrides from a JSON file keyed by language tag:
    ///
    /// ```json
    /// { "java": { "image": "sandbox-java:17" }, "c": { "enabled": false } }
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::builtin().with_overrides(&raw)
    }

    pub fn with_overrides(mut self, json: &str) -> Result<Self, RegistryError> {
        let overrides: HashMap<String, LanguageOverride> = serde_json::from_str(json)?;
        for (tag, ov) in overrides {
            let language: Language = tag.parse()?;
            if !ov.enabled {
                self.specs.remove(&language);
                continue;
            }
            let spec = self
                .specs
                .entry(language)
                .or_insert_with(|| builtin_spec(language));
            if let Some(file) = ov.source_file {
                spec.source_file = file;
            }
            if ov.compile_cmd.is_some() {
                spec.compile_cmd = ov.compile_cmd;
            }
            if let Some(run) = ov.run_cmd {
                spec.run_cmd = run;
            }
            if ov.image.is_some() {
                spec.image = ov.image;
            }
        }
        Ok(self)
    }

    pub fn get(&self, language: Language) -> Result<&LanguageSpec, UnsupportedLanguage> {
        self.specs
            .get(&language)
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    /// Resolve a declared language string to an enabled language
    pub fn resolve(&self, declared: &str) -> Result<Language, UnsupportedLanguage> {
        let language: Language = declared.parse()?;
        self.get(language)?;
        Ok(language)
    }

    pub fn enabled_languages(&self) -> Vec<Language> {
        let mut langs: Vec<Language> = self.specs.keys().copied().collect();
        langs.sort_by_key(|l| l.as_str());
        langs
    }

    /// Normalized signature `language:paramType->returnType`, or `None` when
    /// the code has no recognizable entry point
    pub fn extract_signature(&self, code: &str, language: Language) -> Option<String> {
        let spec = self.specs.get(&language)?;
        let (param, ret) = spec.signature.extract(code)?;
        Some(format!("{}:{}->{}", language, param, ret))
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_spec(language: Language) -> LanguageSpec {
    match language {
        Language::C => LanguageSpec {
            language,
            source_file: "main.c".to_string(),
            compile_cmd: Some("gcc main.c -O2 -o main".to_string()),
            run_cmd: "./main".to_string(),
            image: None,
            signature: SignatureRule::new(
                r"(?s)(?P<ret>int)\s+solve\s*\(\s*(?P<param>int)\s+\w+\s*\)",
                None,
                "int",
            ),
        },
        Language::Cpp => LanguageSpec {
            language,
            source_file: "main.cpp".to_string(),
            compile_cmd: Some("g++ main.cpp -O2 -o main".to_string()),
            run_cmd: "./main".to_string(),
            image: None,
            signature: SignatureRule::new(
                r"(?s)class\s+Solution\s*\{.*public\s*:\s*(?P<ret>int)\s+solve\s*\(\s*(?P<param>int|[A-Za-z0-9_<>: ]+)\s+\w+\s*\)",
                None,
                "int",
            ),
        },
        Language::Java => LanguageSpec {
            language,
            source_file: "Main.java".to_string(),
            compile_cmd: Some("javac Main.java".to_string()),
            run_cmd: "java Main".to_string(),
            image: None,
            signature: SignatureRule::new(
                r"(?s)class\s+Solution\s*\{.*public\s+(?P<ret>int)\s+solve\s*\(\s*(?P<param>int|[A-Za-z0-9_<>\[\]]+)\s+\w+\s*\)",
                None,
                "int",
            ),
        },
        Language::Python => LanguageSpec {
            language,
            source_file: "main.py".to_string(),
            compile_cmd: None,
            run_cmd: "python3 main.py".to_string(),
            image: None,
            signature: SignatureRule::new(
                r"(?s)class\s+Solution\s*:\s*def\s+solve\s*\(\s*self\s*,\s*\w+\s*:\s*(?P<param>[A-Za-z0-9_\[\]]+)\s*\)(?:\s*->\s*(?P<ret>[A-Za-z0-9_\[\]]+))?",
                None,
                "int",
            ),
        },
        Language::JavaScript => LanguageSpec {
            language,
            source_file: "main.js".to_string(),
            compile_cmd: None,
            run_cmd: "node main.js".to_string(),
            image: None,
            signature: SignatureRule::new(
                r"(?s)class\s+Solution\s*\{.*solve\s*\(\s*\w+\s*\)",
                Some("any"),
                "any",
            ),
        },
    }
}
