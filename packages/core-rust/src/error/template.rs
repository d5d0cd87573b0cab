//! Templated error rendering.
//!
//! Handlers return a symbolic code plus metadata; the templates configured
//! for that code turn it into a localized [`StructuredError`] using the
//! invocation's data bag.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::code::ErrCode;
use super::envelope::StructuredError;
use super::flat::FlatError;
use crate::bag::DataBag;
use crate::value::Value;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid"));

static PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.?[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("path pattern is valid")
});

/// Errors from parsing a text template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid placeholder {placeholder:?} in template {template:?}")]
    InvalidPlaceholder {
        template: String,
        placeholder: String,
    },
    #[error("unterminated placeholder in template {template:?}")]
    Unterminated { template: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Path(Vec<String>),
}

/// A string with `{{ key }}` / `{{ .key.nested }}` placeholders, parsed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TextTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TextTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` for a placeholder that is not a dotted key path
    /// or a `{{` without a matching `}}`.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()], source)?;

            let expr = inner.as_str().trim();
            if !PATH.is_match(expr) {
                return Err(TemplateError::InvalidPlaceholder {
                    template: source.to_string(),
                    placeholder: expr.to_string(),
                });
            }
            let path = expr
                .trim_start_matches('.')
                .split('.')
                .map(str::to_string)
                .collect();
            segments.push(Segment::Path(path));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..], source)?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Renders against a bag. Missing and null values render as empty text.
    #[must_use]
    pub fn render(&self, bag: &DataBag) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Path(path) => {
                    let value = path
                        .split_first()
                        .and_then(|(head, rest)| bag.get(head)?.pointer(rest));
                    match value {
                        None | Some(Value::Null) => {}
                        Some(v) => out.push_str(&v.to_string()),
                    }
                }
            }
        }
        out
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str, source: &str) -> Result<(), TemplateError> {
    if text.contains("{{") {
        return Err(TemplateError::Unterminated {
            template: source.to_string(),
        });
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

impl TryFrom<String> for TextTemplate {
    type Error = TemplateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TextTemplate> for String {
    fn from(t: TextTemplate) -> Self {
        t.source
    }
}

impl fmt::Display for TextTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Localized overrides for one locale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizedStrings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<TextTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<TextTemplate>,
}

/// Rendering rules for one symbolic error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorTemplate {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub code: ErrCode,
    /// Overrides the code's default status when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<TextTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<TextTemplate>,
    /// Rendered into the error's `instance`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<TextTemplate>,
    /// Rendered into `details.help`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<TextTemplate>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub locales: BTreeMap<String, LocalizedStrings>,
}

impl ErrorTemplate {
    /// Renders a structured error. `locale` picks overrides by exact tag,
    /// then by language (`pt-BR` falls back to `pt`), then the base strings.
    #[must_use]
    pub fn render(&self, bag: &DataBag, locale: Option<&str>) -> StructuredError {
        let localized = locale.and_then(|l| self.localized(l));
        let title = localized
            .and_then(|l| l.title.as_ref())
            .or(self.title.as_ref());
        let message = localized
            .and_then(|l| l.message.as_ref())
            .or(self.message.as_ref());

        let mut err = StructuredError::from_code(self.code);
        if let Some(kind) = &self.kind {
            err.kind.clone_from(kind);
        }
        if let Some(status) = self.status {
            err.status = status;
        }
        if let Some(t) = title {
            err.title = t.render(bag);
        }
        if let Some(t) = message {
            err.message = t.render(bag);
        }
        if let Some(instance) = self.path.as_ref().map(|t| t.render(bag)) {
            if !instance.is_empty() {
                err.instance = Some(instance);
            }
        }
        if let Some(help) = self.help.as_ref().map(|t| t.render(bag)) {
            if !help.is_empty() {
                err.details = Some([("help".to_string(), help)].into_iter().collect());
            }
        }
        err
    }

    fn localized(&self, locale: &str) -> Option<&LocalizedStrings> {
        self.locales.get(locale).or_else(|| {
            let language = locale.split(['-', '_']).next()?;
            self.locales.get(language)
        })
    }
}

/// Error templates keyed by symbolic code (the first line of flat text).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorTemplates {
    templates: HashMap<String, ErrorTemplate>,
}

impl ErrorTemplates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, template: ErrorTemplate) -> Self {
        self.templates.insert(name.into(), template);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ErrorTemplate> {
        self.templates.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Turns a flat error into a rendered structured error.
    ///
    /// The flat metadata is visible to the template under its own keys and
    /// shadows bag entries of the same name. It is also kept as the error's
    /// server-side metadata. Codes without a template fall back to
    /// [`StructuredError::from_flat`].
    #[must_use]
    pub fn resolve(&self, flat: &FlatError, bag: &DataBag, locale: Option<&str>) -> StructuredError {
        let Some(template) = self.templates.get(flat.code()) else {
            return StructuredError::from_flat(flat);
        };

        let mut scope = bag.clone();
        for (k, v) in flat.metadata() {
            scope.insert(k.clone(), v.as_str());
        }

        let mut err = template.render(&scope, locale);
        err.metadata = flat
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        err
    }
}
