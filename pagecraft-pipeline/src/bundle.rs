//! Artifact bundles and parsing of three-section model responses.
//!
//! A response is expected to look like:
//!
//! ```text
//! ===INDEX.HTML===
//! <!DOCTYPE html>...
//! ===README.MD===
//! # App...
//! ===LICENSE===
//! MIT License...
//! ```
//!
//! Each section is found by its own delimiter, so a missing or reordered
//! section only costs that section. Whatever cannot be extracted is replaced
//! with fixed fallback content.

use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use crate::request::Attachment;

/// Everything published for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBundle {
    pub index_html: String,
    pub readme: String,
    pub license: String,
    pub attachments: Vec<Attachment>,
}

/// Content of a file to publish, with the encoding the blob API expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

/// One file at its repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: String,
    pub content: FileContent,
}

impl ArtifactBundle {
    /// Flatten the bundle into repository files: the three documents first,
    /// then every attachment.
    pub fn files(&self) -> Vec<BundleFile> {
        let mut files = vec![
            BundleFile {
                path: "index.html".to_string(),
                content: FileContent::Text(self.index_html.clone()),
            },
            BundleFile {
                path: "README.md".to_string(),
                content: FileContent::Text(self.readme.clone()),
            },
            BundleFile {
                path: "LICENSE".to_string(),
                content: FileContent::Text(self.license.clone()),
            },
        ];
        files.extend(self.attachments.iter().map(|att| BundleFile {
            path: att.name.clone(),
            content: FileContent::Binary(att.bytes.clone()),
        }));
        files
    }
}

static HTML_SECTION: LazyLock<Regex> = LazyLock::new(|| section_regex(r"INDEX\.HTML"));
static README_SECTION: LazyLock<Regex> = LazyLock::new(|| section_regex(r"README\.MD"));
static LICENSE_SECTION: LazyLock<Regex> = LazyLock::new(|| section_regex("LICENSE"));

// A section runs up to the next known delimiter or the end of text, so a
// `===` inside generated JavaScript does not cut the page short.
fn section_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?is)==={name}===\s*(.*?)(?:===(?:INDEX\.HTML|README\.MD|LICENSE)===|\z)"
    ))
    .expect("section pattern is valid")
}

fn extract(re: &Regex, response: &str) -> Option<String> {
    re.captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split a model response into a bundle with no attachments.
pub fn parse_generated(response: &str) -> ArtifactBundle {
    let index_html = extract(&HTML_SECTION, response).unwrap_or_else(|| {
        tracing::warn!("Response has no index.html section, using fallback page");
        fallback_html()
    });
    let readme = extract(&README_SECTION, response).unwrap_or_else(|| {
        tracing::warn!("Response has no README section, using fallback");
        fallback_readme()
    });
    let license = extract(&LICENSE_SECTION, response).unwrap_or_else(|| {
        tracing::warn!("Response has no LICENSE section, using MIT");
        mit_license()
    });

    ArtifactBundle {
        index_html,
        readme,
        license,
        attachments: Vec::new(),
    }
}

pub fn fallback_html() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Generated App</title>
  <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css" rel="stylesheet">
</head>
<body>
  <div class="container mt-5">
    <h1>Generated Application</h1>
    <p>This is a generated application.</p>
  </div>
  <script src="https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js"></script>
</body>
</html>"#
        .to_string()
}

pub fn fallback_readme() -> String {
    r#"# Generated Application

## Summary
This is an automatically generated web application.

## Setup
No setup required. Open index.html in a web browser.

## Usage
Open the application in your browser and follow the on-screen instructions.

## Code Explanation
This application uses HTML, JavaScript, and Bootstrap for styling."#
        .to_string()
}

/// MIT license text for the current year.
pub fn mit_license() -> String {
    let year = chrono::Utc::now().year();
    format!(
        r#"MIT License

Copyright (c) {year}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE."#
    )
}
