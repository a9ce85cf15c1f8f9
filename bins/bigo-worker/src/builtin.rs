/// Built-in instrumentation
///
/// Deterministic wrappers for Python and JavaScript, used when no remote
/// generator is configured. Each one calls `Solution().solve` at sizes
/// 1000/2000/4000 with an input derived from the parameter type and prints
/// the three timing markers.

use async_trait::async_trait;
use bigo_common::timing::MarkerFormat;
use bigo_common::Language;

use crate::llm::{parse_signature, CodeGenerator, GenerationError};
use crate::transformer::{inject, USER_CODE_MARKER};

pub struct BuiltinGenerator;

#[async_trait]
impl CodeGenerator for BuiltinGenerator {
    async fn generate_boilerplate(&self, language: Language, code: &str) -> Result<String, GenerationError> {
        let template = wrapper_template(language, default_param(language), MarkerFormat::Assignment)?;
        Ok(inject(&template, code))
    }

    async fn generate_wrapper(&self, signature: &str) -> Result<String, GenerationError> {
        let (language, param, _ret) = parse_signature(signature)?;
        wrapper_template(language, param, MarkerFormat::Labeled)
    }
}

fn default_param(language: Language) -> &'static str {
    match language {
        Language::JavaScript => "any",
        _ => "int",
    }
}

/// Template with the user-code marker and a timing loop
pub fn wrapper_template(language: Language, param: &str, format: MarkerFormat) -> Result<String, GenerationError> {
    match language {
        Language::Python => Ok(python_template(param, format)),
        Language::JavaScript => Ok(javascript_template(format)),
        other => Err(GenerationError::Unsupported(other)),
    }
}

/// Python expression building an input of size `n`
fn python_input(param: &str) -> &'static str {
    let lowered = param.to_ascii_lowercase();
    if lowered.starts_with("list[str") {
        "['a'] * n"
    } else if lowered.starts_with("list") {
        "list(range(n, 0, -1))"
    } else if lowered == "str" {
        "'a' * n"
    } else if lowered == "float" {
        "float(n)"
    } else {
        "n"
    }
}

const SIZES: [(&str, u32); 3] = [("SMALL", 1000), ("MEDIUM", 2000), ("LARGE", 4000)];

fn python_template(param: &str, format: MarkerFormat) -> String {
    let mut out = String::new();
    out.push_str("import time\n\n");
    out.push_str(USER_CODE_MARKER);
    out.push_str(&format!(
        "\n\n\ndef _bigo_input(n):\n    return {}\n\n\n\
         def _bigo_time(solution, n):\n    \
         arg = _bigo_input(n)\n    \
         start = time.perf_counter()\n    \
         solution.solve(arg)\n    \
         return time.perf_counter() - start\n\n\n\
         if __name__ == \"__main__\":\n    \
         _solution = Solution()\n",
        python_input(param)
    ));
    for (label, n) in SIZES {
        let line = match format {
            MarkerFormat::Labeled => {
                format!("    print(f\"{}: {{_bigo_time(_solution, {}):.9f}}\")\n", label, n)
            }
            MarkerFormat::Assignment => format!(
                "    print(f\"{}_TIME={{_bigo_time(_solution, {}) * 1_000_000:.3f}}\")\n",
                label, n
            ),
        };
        out.push_str(&line);
    }
    out
}

fn javascript_template(format: MarkerFormat) -> String {
    let mut out = String::new();
    out.push_str(USER_CODE_MARKER);
    out.push_str(
        "\n\nconst _solution = new Solution();\n\n\
         function _bigoTime(n) {\n  \
         const start = process.hrtime.bigint();\n  \
         _solution.solve(n);\n  \
         return Number(process.hrtime.bigint() - start);\n\
         }\n\n",
    );
    for (label, n) in SIZES {
        let line = match format {
            // hrtime is nanoseconds
            MarkerFormat::Labeled => {
                format!("console.log(`{}: ${{(_bigoTime({}) / 1e9).toFixed(9)}}`);\n", label, n)
            }
            MarkerFormat::Assignment => {
                format!("console.log(`{}_TIME=${{(_bigoTime({}) / 1e3).toFixed(3)}}`);\n", label, n)
            }
        };
        out.push_str(&line);
    }
    out
}
