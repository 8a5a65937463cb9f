//! Page model, action requests and the coordinator → actuator seam.
//!
//! The actuator owns the live document; everything in this module is a plain
//! value copied across the channel boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::message::TabId;

/// Maximum headings in a [`PageModel`].
pub const MAX_HEADINGS: usize = 15;
/// Maximum interactable elements enumerated into a [`PageModel`].
pub const MAX_INTERACTABLE: usize = 40;
/// Maximum forms in a [`PageModel`].
pub const MAX_FORMS: usize = 5;
/// Maximum characters of main text.
pub const MAX_MAIN_TEXT: usize = 4000;
/// Maximum characters of any single element's text.
pub const MAX_ELEMENT_TEXT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub tag: String,
    pub text: String,
}

/// One entry of the interactive-element enumeration.
///
/// `index` is the element's position in the full enumeration, and stays
/// stable even when unlabeled neighbours are filtered out of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractableElement {
    pub index: usize,
    pub tag: String,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    pub fields: Vec<FormField>,
}

/// Token-bounded summary of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageModel {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub headings: Vec<Heading>,
    #[serde(default)]
    pub interactable_elements: Vec<InteractableElement>,
    #[serde(default)]
    pub forms: Vec<FormSummary>,
    #[serde(default)]
    pub main_text: String,
    #[serde(default)]
    pub page_height: i64,
    #[serde(default)]
    pub scroll_y: i64,
    /// Set only on degraded placeholder models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageModel {
    /// The model used when the actuator could not be reached.
    pub fn placeholder(reason: impl Into<String>) -> Self {
        Self {
            error: Some(format!("Could not read page: {}", reason.into())),
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Element-targeting hints, tried in field order by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
}

impl Target {
    /// True when no hint at all was supplied.
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.index.is_none()
            && self.text.is_none()
            && self.aria_label.is_none()
            && self.point.is_none()
    }
}

/// A single action for the actuator to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRequest {
    Click {
        #[serde(flatten)]
        target: Target,
    },
    FillForm {
        #[serde(default, rename = "fieldName")]
        field_name: Option<String>,
        #[serde(default)]
        selector: Option<String>,
        value: String,
    },
    Scroll {
        delta: i64,
    },
    Navigate {
        url: String,
    },
    GetText {
        #[serde(flatten)]
        target: Target,
    },
    SubmitForm {
        #[serde(default)]
        selector: Option<String>,
    },
}

impl ActionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::FillForm { .. } => "fill_form",
            Self::Scroll { .. } => "scroll",
            Self::Navigate { .. } => "navigate",
            Self::GetText { .. } => "get_text",
            Self::SubmitForm { .. } => "submit_form",
        }
    }
}

/// Outcome of one action. `payload` keys are flattened next to `success`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    /// A successful result. Non-object payloads are stored under `result`.
    pub fn ok(payload: serde_json::Value) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".into(), other);
                map
            }
        };
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: serde_json::Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }

    /// JSON text as fed back to the model in a tool turn.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"unserializable result"}"#.to_string()
        })
    }
}

impl From<ActionError> for ActionResult {
    fn from(err: ActionError) -> Self {
        Self::failure(err.to_string())
    }
}

/// The coordinator's handle on one tab's actuator.
///
/// `Err` means the message never got a reply (actuator gone). Failures inside
/// the page come back as `Ok` with `success: false`.
#[async_trait]
pub trait TabConnection: Send + Sync {
    fn tab_id(&self) -> TabId;

    /// Extract the current [`PageModel`].
    async fn page_context(&self) -> Result<PageModel, ActionError>;

    /// Execute one action in the page.
    async fn execute(&self, action: ActionRequest) -> Result<ActionResult, ActionError>;

    /// Load a new URL into the tab (privileged navigation).
    async fn load_url(&self, url: &str) -> Result<(), ActionError>;

    /// Liveness probe.
    async fn ping(&self) -> bool {
        self.page_context().await.is_ok()
    }
}
