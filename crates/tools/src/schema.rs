//! JSON-schema descriptions of the browser tools, as sent to the model.

use serde_json::json;
use tabpilot_core::provider::ToolDefinition;
use tabpilot_core::tool::BrowserTool;

/// Every tool, in vocabulary order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    BrowserTool::ALL.into_iter().map(definition).collect()
}

pub fn definition(tool: BrowserTool) -> ToolDefinition {
    let (description, parameters) = match tool {
        BrowserTool::ReadPage => (
            "Read the current page. Always call this first before any other action to understand what is on the page.",
            json!({"type": "object", "properties": {}}),
        ),
        BrowserTool::ClickElement => (
            "Click a button, link, or interactive element. Prefer element_index from read_page results; selector, visible text, aria_label or x/y coordinates are fallbacks.",
            json!({
                "type": "object",
                "properties": {
                    "element_index": {"type": "integer", "description": "Index from the interactable elements list returned by read_page"},
                    "selector": {"type": "string", "description": "CSS selector as fallback"},
                    "text": {"type": "string", "description": "Visible text of the button or link"},
                    "aria_label": {"type": "string", "description": "Exact aria-label of the element"},
                    "x": {"type": "number", "description": "Viewport x coordinate"},
                    "y": {"type": "number", "description": "Viewport y coordinate"},
                    "description": {"type": "string", "description": "Describe what you are clicking (for user display)"}
                }
            }),
        ),
        BrowserTool::FillForm => (
            "Fill in a form field (input, textarea, select). Use field_name (name/id attribute) or selector.",
            json!({
                "type": "object",
                "properties": {
                    "field_name": {"type": "string", "description": "The name or id attribute of the field"},
                    "selector": {"type": "string", "description": "CSS selector as fallback"},
                    "value": {"type": "string", "description": "The value to fill in"}
                },
                "required": ["value"]
            }),
        ),
        BrowserTool::Navigate => (
            "Navigate the browser to a new URL.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Full URL including https://"}
                },
                "required": ["url"]
            }),
        ),
        BrowserTool::Scroll => (
            "Scroll the page up or down to reveal more content.",
            json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["up", "down"]},
                    "pixels": {"type": "integer", "description": "How many pixels to scroll. Default 600."}
                },
                "required": ["direction"]
            }),
        ),
        BrowserTool::GetText => (
            "Extract the visible text of one element, addressed like click_element.",
            json!({
                "type": "object",
                "properties": {
                    "selector": {"type": "string", "description": "CSS selector of the element to read"},
                    "element_index": {"type": "integer", "description": "Index from read_page results"},
                    "text": {"type": "string", "description": "Visible text of a button or link"},
                    "aria_label": {"type": "string", "description": "Exact aria-label of the element"}
                }
            }),
        ),
        BrowserTool::Wait => (
            "Wait for a specified number of milliseconds (useful after navigation or clicking async elements).",
            json!({
                "type": "object",
                "properties": {
                    "ms": {"type": "integer", "description": "Milliseconds to wait (max 5000)"}
                },
                "required": ["ms"]
            }),
        ),
        BrowserTool::SubmitForm => (
            "Submit a form. The user may be asked to confirm first.",
            json!({
                "type": "object",
                "properties": {
                    "selector": {"type": "string", "description": "CSS selector of the form; defaults to the first form"}
                }
            }),
        ),
        BrowserTool::WebSearch => (
            "Search the web and return a short answer. Use when the page does not contain the information needed.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query"}
                },
                "required": ["query"]
            }),
        ),
    };

    ToolDefinition {
        name: tool.name().to_string(),
        description: description.to_string(),
        parameters,
    }
}
