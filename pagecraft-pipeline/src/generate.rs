//! Generation adapter: prompt construction and response parsing.

use std::sync::Arc;

use crate::bundle::{self, ArtifactBundle};
use crate::error::GenerateError;
use crate::llm::CodeModel;
use crate::request::DeploymentRequest;

pub const SYSTEM_PROMPT: &str =
    "You are an expert web developer who creates single-file, production-ready web applications.";

/// Placeholder given to the revision prompt when the previous round had no page.
pub const NO_EXISTING_CODE: &str = "No existing code found";

const RESPONSE_FORMAT: &str = r#"Return your response in this exact format:
===INDEX.HTML===
[The full index.html with all HTML and functional JavaScript]
===README.MD===
[A README.md with summary, setup, usage and code explanation]
===LICENSE===
[The full text of the MIT LICENSE]"#;

/// Produces artifact bundles from a request, optionally revising a prior page.
#[derive(Clone)]
pub struct Generator {
    model: Arc<dyn CodeModel>,
}

impl Generator {
    pub fn new(model: Arc<dyn CodeModel>) -> Self {
        Self { model }
    }

    /// Fresh generation when `prior` is `None`, constrained revision otherwise.
    ///
    /// Attachments on the returned bundle are left empty; the caller owns them.
    pub async fn generate(
        &self,
        request: &DeploymentRequest,
        attachment_names: &[String],
        prior: Option<&str>,
    ) -> Result<ArtifactBundle, GenerateError> {
        let prompt = match prior {
            None => {
                tracing::info!(task = %request.task, "Generating new app");
                fresh_prompt(&request.brief, &request.checks, attachment_names)
            }
            Some(existing) => {
                tracing::info!(task = %request.task, round = request.round, "Revising existing app");
                revision_prompt(existing, &request.brief, &request.checks)
            }
        };

        let response = self.model.complete(SYSTEM_PROMPT, &prompt).await?;
        Ok(bundle::parse_generated(&response))
    }
}

pub fn fresh_prompt(brief: &str, checks: &[String], attachment_names: &[String]) -> String {
    format!(
        r#"Your task is to generate an index.html file based on a user's brief. The file must contain both HTML structure and all necessary JavaScript logic within a <script> tag.

### CONTEXT ###
- You will be given a user's brief, a list of attachments, and a list of automated checks the final code must pass.
- You must use the attachments and make sure the code is functional enough to pass the checks.

### RULES ###
- For attachments like CSV or JSON, embed the data directly into a JavaScript variable. DO NOT use `fetch`.
- The JavaScript MUST be functional and perform all required calculations.
- Use Bootstrap 5 for a clean, professional interface: center the main container and wrap the content in a card.

### YOUR TASK ###
**User's Brief:** {brief}
**Attachments:** {attachments}
**Checks:** {checks}

{RESPONSE_FORMAT}"#,
        attachments = attachment_names.join(", "),
        checks = checks.join(", "),
    )
}

pub fn revision_prompt(existing: &str, brief: &str, checks: &[String]) -> String {
    let existing = if existing.trim().is_empty() {
        NO_EXISTING_CODE
    } else {
        existing
    };
    format!(
        r#"Your task is to update an existing application by adding a new feature while strictly preserving its core functionality and user experience.

### CORE INSTRUCTIONS ###
1. Analyze the existing code and identify its purpose and user interaction model.
2. Identify the single new feature the new brief asks for.
3. PRESERVE ALL ORIGINAL LOGIC: the original behavior must still be present and functional.
4. DO NOT CHANGE THE CORE INTERACTION MODEL: a page that loaded and displayed data automatically must still do so.
5. Unless the brief explicitly asks for them, DO NOT add <textarea> or <button> elements. Only add what the brief requests.

**Existing Code:**
```html
{existing}
```

**New Brief:**
```
{brief}
```

**Checks the combined code must pass:**
{checks}

{RESPONSE_FORMAT}"#,
        checks = checks.join(", "),
    )
}
