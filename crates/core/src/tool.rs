//! The closed browser tool vocabulary and its typed arguments.
//!
//! The model only ever sees tool *names* and JSON arguments. This module maps
//! a name onto [`BrowserTool`] and the loosely-typed argument object onto a
//! [`ToolInvocation`], so the dispatcher can match exhaustively instead of
//! switching on strings.

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::page::{Point, Target};

/// Every tool the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserTool {
    ReadPage,
    ClickElement,
    FillForm,
    Navigate,
    Scroll,
    GetText,
    Wait,
    SubmitForm,
    WebSearch,
}

impl BrowserTool {
    /// All tools, in the order they are advertised to the model.
    pub const ALL: [BrowserTool; 9] = [
        BrowserTool::ReadPage,
        BrowserTool::ClickElement,
        BrowserTool::FillForm,
        BrowserTool::Navigate,
        BrowserTool::Scroll,
        BrowserTool::GetText,
        BrowserTool::Wait,
        BrowserTool::SubmitForm,
        BrowserTool::WebSearch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadPage => "read_page",
            Self::ClickElement => "click_element",
            Self::FillForm => "fill_form",
            Self::Navigate => "navigate",
            Self::Scroll => "scroll",
            Self::GetText => "get_text",
            Self::Wait => "wait",
            Self::SubmitForm => "submit_form",
            Self::WebSearch => "web_search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Names of the whole vocabulary, used by the text fallback extractor.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.name()).collect()
    }

    /// Whether this tool can only run after the user allows it (subject to
    /// the matching confirmation preference).
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Navigate | Self::SubmitForm)
    }
}

impl std::fmt::Display for BrowserTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for BrowserTool {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

// --- Typed arguments ---

/// Targeting hints shared by `click_element` and `get_text`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TargetArgs {
    #[serde(default, deserialize_with = "lenient::opt_usize")]
    pub element_index: Option<usize>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub selector: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub text: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub aria_label: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub x: Option<f64>,

    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub y: Option<f64>,

    /// Free-form description of the element, for display only
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
}

impl TargetArgs {
    pub fn target(&self) -> Target {
        Target {
            selector: self.selector.clone(),
            index: self.element_index,
            text: self.text.clone(),
            aria_label: self.aria_label.clone(),
            point: match (self.x, self.y) {
                (Some(x), Some(y)) => Some(Point { x, y }),
                _ => None,
            },
        }
    }

    /// A short label for UI summaries.
    pub fn describe(&self) -> String {
        self.description
            .clone()
            .or_else(|| self.selector.clone())
            .or_else(|| self.text.clone().map(|t| format!("\"{t}\"")))
            .or_else(|| self.aria_label.clone())
            .or_else(|| self.element_index.map(|i| format!("element #{i}")))
            .unwrap_or_else(|| "element".into())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FillFormArgs {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub field_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub selector: Option<String>,

    #[serde(deserialize_with = "lenient::string")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigateArgs {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrollArgs {
    #[serde(default)]
    pub direction: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub pixels: Option<u64>,
}

/// Scroll magnitude when the model does not give one.
pub const DEFAULT_SCROLL_PIXELS: u64 = 600;

impl ScrollArgs {
    /// Signed pixel delta: `up` negates the magnitude.
    pub fn signed_delta(&self) -> i64 {
        let magnitude = self.pixels.unwrap_or(DEFAULT_SCROLL_PIXELS).min(i64::MAX as u64) as i64;
        match self.direction.as_deref() {
            Some(d) if d.eq_ignore_ascii_case("up") => -magnitude,
            _ => magnitude,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WaitArgs {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubmitFormArgs {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
}

/// A tool call with its arguments decoded into the tool's own type.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    ReadPage,
    ClickElement(TargetArgs),
    FillForm(FillFormArgs),
    Navigate(NavigateArgs),
    Scroll(ScrollArgs),
    GetText(TargetArgs),
    Wait(WaitArgs),
    SubmitForm(SubmitFormArgs),
    WebSearch(WebSearchArgs),
}

impl ToolInvocation {
    /// Decode `arguments` for `tool`. Unknown keys are ignored; missing
    /// required keys or wrongly-typed values are reported as
    /// [`ToolError::InvalidArguments`].
    pub fn parse(
        tool: BrowserTool,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ToolError> {
        let value = serde_json::Value::Object(resolve_aliases(tool, arguments));
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: tool.name().to_string(),
            reason: e.to_string(),
        };

        Ok(match tool {
            BrowserTool::ReadPage => Self::ReadPage,
            BrowserTool::ClickElement => Self::ClickElement(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::FillForm => Self::FillForm(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::Navigate => Self::Navigate(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::Scroll => Self::Scroll(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::GetText => Self::GetText(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::Wait => Self::Wait(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::SubmitForm => Self::SubmitForm(serde_json::from_value(value).map_err(invalid)?),
            BrowserTool::WebSearch => Self::WebSearch(serde_json::from_value(value).map_err(invalid)?),
        })
    }

    pub fn tool(&self) -> BrowserTool {
        match self {
            Self::ReadPage => BrowserTool::ReadPage,
            Self::ClickElement(_) => BrowserTool::ClickElement,
            Self::FillForm(_) => BrowserTool::FillForm,
            Self::Navigate(_) => BrowserTool::Navigate,
            Self::Scroll(_) => BrowserTool::Scroll,
            Self::GetText(_) => BrowserTool::GetText,
            Self::Wait(_) => BrowserTool::Wait,
            Self::SubmitForm(_) => BrowserTool::SubmitForm,
            Self::WebSearch(_) => BrowserTool::WebSearch,
        }
    }
}

/// Alternative key spellings models use, as `(alias, canonical)`.
fn aliases(tool: BrowserTool) -> &'static [(&'static str, &'static str)] {
    match tool {
        BrowserTool::ClickElement | BrowserTool::GetText => &[
            ("index", "element_index"),
            ("ariaLabel", "aria_label"),
            ("label", "aria_label"),
        ],
        BrowserTool::FillForm => &[("name", "field_name")],
        BrowserTool::Scroll => &[("amount", "pixels")],
        BrowserTool::Wait => &[("milliseconds", "ms")],
        _ => &[],
    }
}

/// Fold aliases into their canonical keys. A non-null canonical value wins
/// over any alias; among aliases the first listed wins.
fn resolve_aliases(
    tool: BrowserTool,
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut resolved = arguments.clone();
    for (alias, canonical) in aliases(tool) {
        let Some(value) = resolved.remove(*alias) else {
            continue;
        };
        let taken = resolved.get(*canonical).is_some_and(|v| !v.is_null());
        if !taken {
            resolved.insert(canonical.to_string(), value);
        }
    }
    resolved
}

/// Deserializers that accept the sloppy shapes models tend to produce:
/// numbers as strings, strings as numbers, explicit nulls.
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number<E: serde::de::Error>(value: Value) -> Result<Option<f64>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| E::custom("number out of range")),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| E::custom(format!("expected a number, got \"{s}\""))),
            other => Err(E::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        number(Value::deserialize(d)?)
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match number::<D::Error>(Value::deserialize(d)?)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.is_finite() => Ok(Some(n as u64)),
            Some(n) => Err(D::Error::custom(format!("expected a non-negative number, got {n}"))),
        }
    }

    pub fn opt_usize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        opt_u64(d).map(|n| n.map(|n| n as usize))
    }

    fn text<E: serde::de::Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(E::custom(format!("expected a string, got {other}"))),
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(text::<D::Error>(Value::deserialize(d)?)?.filter(|s| !s.is_empty()))
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(text::<D::Error>(Value::deserialize(d)?)?.unwrap_or_default())
    }
}
