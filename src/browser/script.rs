//! Declarative page-interaction scripts.
//!
//! A script is a list of [`ScriptAction`]s executed by the render service in
//! order. `Loop` and `While` nest further scripts. The JSON shape is
//! `{"action": <name>, "args": {...}}`, with `args` omitted for `extract`.

use crate::error::SpiderError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder substituted with the iteration index in `While` selectors.
pub const INDEX_PLACEHOLDER: &str = "{index}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "lowercase")]
pub enum ScriptAction {
    /// Emit the current page as one render event.
    Extract,
    Click {
        #[serde(rename = "css_selector")]
        selector: String,
    },
    Wait {
        seconds: f64,
    },
    /// Run `body` `count` times.
    Loop {
        count: u32,
        #[serde(rename = "script")]
        body: Vec<ScriptAction>,
    },
    /// Run `body` while the selector rendered for index `start`, `start + 1`, ... matches.
    While {
        #[serde(rename = "selector")]
        selector_template: String,
        #[serde(rename = "start")]
        start_index: i64,
        #[serde(rename = "script")]
        body: Vec<ScriptAction>,
    },
}

impl ScriptAction {
    pub fn extract() -> Self {
        ScriptAction::Extract
    }

    pub fn click(selector: impl Into<String>) -> Self {
        ScriptAction::Click {
            selector: selector.into(),
        }
    }

    pub fn wait(seconds: f64) -> Self {
        ScriptAction::Wait { seconds }
    }

    pub fn repeat(count: u32, body: Vec<ScriptAction>) -> Self {
        ScriptAction::Loop { count, body }
    }

    pub fn while_matches(
        selector_template: impl Into<String>,
        start_index: i64,
        body: Vec<ScriptAction>,
    ) -> Self {
        ScriptAction::While {
            selector_template: selector_template.into(),
            start_index,
            body,
        }
    }

    /// Nested script of `Loop`/`While`, empty for leaf actions.
    pub fn body(&self) -> &[ScriptAction] {
        match self {
            ScriptAction::Loop { body, .. } | ScriptAction::While { body, .. } => body,
            _ => &[],
        }
    }

    /// Renders a `While` selector template for one iteration.
    pub fn render_selector(template: &str, index: i64) -> String {
        template.replace(INDEX_PLACEHOLDER, &index.to_string())
    }
}

/// Parses a script from raw JSON.
///
/// Anything that is not an array yields the empty script. An array whose
/// entries are not valid actions is an error.
pub fn script_from_value(value: &Value) -> Result<Vec<ScriptAction>, SpiderError> {
    match value {
        Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|e| SpiderError::InvalidScript(e.to_string())),
        _ => Ok(Vec::new()),
    }
}

pub fn script_to_value(script: &[ScriptAction]) -> Result<Value, SpiderError> {
    Ok(serde_json::to_value(script)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_to_wire_shape() {
        let script = vec![
            ScriptAction::extract(),
            ScriptAction::click(".next a"),
            ScriptAction::wait(0.1),
            ScriptAction::repeat(2, vec![ScriptAction::extract()]),
            ScriptAction::while_matches("li:nth-child({index}) a", 1, vec![]),
        ];

        assert_eq!(
            script_to_value(&script).unwrap(),
            json!([
                {"action": "extract"},
                {"action": "click", "args": {"css_selector": ".next a"}},
                {"action": "wait", "args": {"seconds": 0.1}},
                {"action": "loop", "args": {"count": 2, "script": [{"action": "extract"}]}},
                {"action": "while", "args": {"selector": "li:nth-child({index}) a", "start": 1, "script": []}},
            ])
        );
    }

    #[test]
    fn parses_nested_scripts() {
        let raw = json!([
            {"action": "loop", "args": {"count": 50, "script": [
                {"action": "extract"},
                {"action": "click", "args": {"css_selector": ".next a"}},
                {"action": "wait", "args": {"seconds": 0.1}},
            ]}},
        ]);

        let script = script_from_value(&raw).unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(script[0].body().len(), 3);
        assert_eq!(script[0].body()[1], ScriptAction::click(".next a"));
    }

    #[test]
    fn non_sequence_defaults_to_empty_script() {
        assert!(script_from_value(&json!({"action": "extract"})).unwrap().is_empty());
        assert!(script_from_value(&json!("extract")).unwrap().is_empty());
        assert!(script_from_value(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn malformed_action_is_rejected() {
        let err = script_from_value(&json!([{"action": "teleport"}])).unwrap_err();
        assert!(matches!(err, SpiderError::InvalidScript(_)));

        let err = script_from_value(&json!([{"action": "click", "args": {}}])).unwrap_err();
        assert!(matches!(err, SpiderError::InvalidScript(_)));
    }

    #[test]
    fn renders_while_selector() {
        assert_eq!(
            ScriptAction::render_selector("ul li:nth-child({index})", 3),
            "ul li:nth-child(3)"
        );
    }
}
