//! Browser commands and the request builder that carries them.
//!
//! A [`BrowserCommand`] is the immutable description of one render job:
//! target URL, interaction script and any extra arguments the render
//! service understands. [`BrowserRequest`] merges the argument sources once,
//! at build time, and attaches the result to a crawl [`Request`] as
//! [`BrowserOptions`].

use crate::browser::script::{ScriptAction, script_from_value, script_to_value};
use crate::browser::transport::StreamHandle;
use crate::error::SpiderError;
use crate::request::Request;
use http::Method;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// Meta key holding the browser execution context.
pub const BROWSER_META: &str = "browser";
/// Target used when a command is built without a URL.
pub const ABOUT_BLANK: &str = "about:blank";

const URL_ARG: &str = "url";
const SCRIPT_ARG: &str = "script";

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserCommand {
    target_url: String,
    script: Vec<ScriptAction>,
    extra_args: BTreeMap<String, Value>,
}

impl BrowserCommand {
    pub fn new(target_url: impl Into<String>, script: Vec<ScriptAction>) -> Self {
        Self {
            target_url: target_url.into(),
            script,
            extra_args: BTreeMap::new(),
        }
    }

    /// Builds a command from a flat argument object.
    ///
    /// `url` and `script` are lifted into their typed fields, everything else
    /// is kept as an extra argument. `default_url` is used when `url` is
    /// missing or not a string.
    pub fn from_args(mut args: Map<String, Value>, default_url: &str) -> Result<Self, SpiderError> {
        let target_url = match args.remove(URL_ARG) {
            Some(Value::String(url)) => url,
            _ => default_url.to_string(),
        };
        let script = match args.remove(SCRIPT_ARG) {
            Some(raw) => script_from_value(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            target_url,
            script,
            extra_args: args.into_iter().collect(),
        })
    }

    /// URL the browser navigates to, fragment included.
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn script(&self) -> &[ScriptAction] {
        &self.script
    }

    pub fn extra_args(&self) -> &BTreeMap<String, Value> {
        &self.extra_args
    }

    /// The argument object sent to the render service.
    pub fn to_args(&self) -> Result<Map<String, Value>, SpiderError> {
        let mut args: Map<String, Value> = self
            .extra_args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        args.insert(URL_ARG.to_string(), Value::String(self.target_url.clone()));
        args.insert(SCRIPT_ARG.to_string(), script_to_value(&self.script)?);
        Ok(args)
    }

    /// Serialized request body. Keys are sorted at every level, so equal
    /// commands always produce identical bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, SpiderError> {
        canonical_json(&Value::Object(self.to_args()?))
    }
}

/// Serializes `value` with object keys in lexicographic order at every level.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, SpiderError> {
    Ok(serde_json::to_vec(&Sorted(value))?)
}

struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut state = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    state.serialize_entry(key, &Sorted(value))?;
                }
                state.end()
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Sorted)),
            other => other.serialize(serializer),
        }
    }
}

/// Browser execution context attached to a crawl request.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub command: BrowserCommand,
    /// Overrides the configured render endpoint name.
    pub endpoint: Option<String>,
    /// Overrides the configured render service base URL.
    pub browser_url: Option<Url>,
    processed: bool,
    stream: Option<StreamHandle>,
}

impl BrowserOptions {
    pub fn new(command: BrowserCommand) -> Self {
        Self {
            command,
            endpoint: None,
            browser_url: None,
            processed: false,
            stream: None,
        }
    }

    /// Options already attached to `request`.
    pub fn of(request: &Request) -> Option<&BrowserOptions> {
        request.extensions().get::<BrowserOptions>()
    }

    pub fn of_mut(request: &mut Request) -> Option<&mut BrowserOptions> {
        request.extensions_mut().get_mut::<BrowserOptions>()
    }

    /// Typed options of `request`, falling back to a `meta["browser"]` object
    /// for requests built by hand. `Ok(None)` means no browser intent.
    pub fn resolve(request: &Request) -> Result<Option<BrowserOptions>, SpiderError> {
        if let Some(options) = Self::of(request) {
            return Ok(Some(options.clone()));
        }
        Self::from_meta(request)
    }

    pub fn from_meta(request: &Request) -> Result<Option<BrowserOptions>, SpiderError> {
        let Some(Value::Object(browser_meta)) = request.get_meta(BROWSER_META) else {
            return Ok(None);
        };

        let args = match browser_meta.get("args") {
            Some(Value::Object(args)) => args.clone(),
            _ => Map::new(),
        };
        let command = BrowserCommand::from_args(args, request.url.as_str())?;

        let mut options = BrowserOptions::new(command);
        options.endpoint = meta_string(browser_meta, "endpoint");
        options.browser_url = meta_string(browser_meta, "browser_url")
            .map(|raw| Url::parse(&raw))
            .transpose()?;
        Ok(Some(options))
    }

    pub fn attach(self, request: &mut Request) {
        request.extensions_mut().insert(self);
    }

    /// Whether the request has already been rewritten for the render service.
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Handle of the logical stream opened for this command, if any.
    pub fn stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref()
    }

    pub(crate) fn set_stream(&mut self, handle: StreamHandle) {
        self.stream = Some(handle);
    }
}

fn meta_string(meta: &Map<String, Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone)]
enum ScriptSource {
    Actions(Vec<ScriptAction>),
    Raw(Value),
}

/// Builder for crawl requests rendered by the browser service.
///
/// ```rust,ignore
/// let request = BrowserRequest::new("http://books.toscrape.com/")
///     .script(vec![ScriptAction::repeat(50, vec![
///         ScriptAction::extract(),
///         ScriptAction::click(".next a"),
///         ScriptAction::wait(0.1),
///     ])])
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct BrowserRequest {
    url: String,
    method: Method,
    script: ScriptSource,
    args: Map<String, Value>,
    meta: Map<String, Value>,
    endpoint: Option<String>,
    browser_url: Option<String>,
}

impl BrowserRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            script: ScriptSource::Actions(Vec::new()),
            args: Map::new(),
            meta: Map::new(),
            endpoint: None,
            browser_url: None,
        }
    }

    /// A command for `about:blank`, for scripts that navigate on their own.
    pub fn blank() -> Self {
        Self::new(ABOUT_BLANK)
    }

    pub fn script(mut self, script: Vec<ScriptAction>) -> Self {
        self.script = ScriptSource::Actions(script);
        self
    }

    /// Script as raw JSON; a non-array value becomes the empty script.
    pub fn raw_script(mut self, script: Value) -> Self {
        self.script = ScriptSource::Raw(script);
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn args(mut self, args: Map<String, Value>) -> Self {
        self.args.extend(args);
        self
    }

    /// Execution context for the request. `meta["browser"]["args"]` takes part
    /// in argument merging, below call-site arguments.
    pub fn meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn browser_url(mut self, browser_url: impl Into<String>) -> Self {
        self.browser_url = Some(browser_url.into());
        self
    }

    pub fn build(self) -> Result<Request, SpiderError> {
        let browser_meta = match self.meta.get(BROWSER_META) {
            Some(Value::Object(browser_meta)) => browser_meta.clone(),
            _ => Map::new(),
        };

        let mut args = Map::new();
        args.insert(URL_ARG.to_string(), Value::String(self.url.clone()));
        let script = match self.script {
            ScriptSource::Actions(actions) => script_to_value(&actions)?,
            ScriptSource::Raw(raw) => raw,
        };
        args.insert(SCRIPT_ARG.to_string(), script);
        if let Some(Value::Object(meta_args)) = browser_meta.get("args") {
            args.extend(meta_args.clone());
        }
        args.extend(self.args);

        let command = BrowserCommand::from_args(args, &self.url)?;

        let mut options = BrowserOptions::new(command);
        options.endpoint = self.endpoint.or_else(|| meta_string(&browser_meta, "endpoint"));
        options.browser_url = self
            .browser_url
            .or_else(|| meta_string(&browser_meta, "browser_url"))
            .map(|raw| Url::parse(&raw))
            .transpose()?;

        let mut target = Url::parse(&self.url)?;
        target.set_fragment(None);

        let mut request = Request::new(target).with_method(self.method);
        request.meta = self.meta;
        options.attach(&mut request);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_to_url_and_empty_script() {
        let request = BrowserRequest::new("http://x").build().unwrap();
        let options = BrowserOptions::of(&request).unwrap();

        assert_eq!(options.command.target_url(), "http://x");
        assert!(options.command.script().is_empty());
        assert!(!options.is_processed());
        assert!(options.stream().is_none());
    }

    #[test]
    fn blank_targets_about_blank() {
        let request = BrowserRequest::blank().build().unwrap();
        let options = BrowserOptions::of(&request).unwrap();
        assert_eq!(options.command.target_url(), ABOUT_BLANK);
    }

    #[test]
    fn fragment_kept_in_command_but_not_in_network_target() {
        let request = BrowserRequest::new("http://example.com/page#section-2")
            .build()
            .unwrap();
        let options = BrowserOptions::of(&request).unwrap();

        assert_eq!(request.url.as_str(), "http://example.com/page");
        assert_eq!(options.command.target_url(), "http://example.com/page#section-2");
    }

    #[test]
    fn call_site_args_override_meta_args_which_override_defaults() {
        let meta = object(json!({
            "browser": {"args": {"wait": 1, "viewport": "800x600", "url": "http://meta"}}
        }));
        let request = BrowserRequest::new("http://x")
            .script(vec![ScriptAction::extract()])
            .arg("wait", json!(5))
            .meta(meta)
            .build()
            .unwrap();
        let command = &BrowserOptions::of(&request).unwrap().command;

        assert_eq!(command.target_url(), "http://meta");
        assert_eq!(command.script(), &[ScriptAction::Extract]);
        assert_eq!(command.extra_args().get("wait"), Some(&json!(5)));
        assert_eq!(command.extra_args().get("viewport"), Some(&json!("800x600")));
    }

    #[test]
    fn building_does_not_alias_the_callers_meta() {
        let shared = object(json!({"browser": {"args": {"nested": {"depth": 1}}}}));
        let request = BrowserRequest::new("http://x")
            .meta(shared.clone())
            .build()
            .unwrap();

        let mut retry = request.clone();
        retry.meta.insert("browser".into(), json!({"args": {"nested": {"depth": 2}}}));

        assert_eq!(request.meta, shared);
        assert_eq!(
            BrowserOptions::of(&request).unwrap().command.extra_args().get("nested"),
            Some(&json!({"depth": 1}))
        );
    }

    #[test]
    fn typed_and_raw_scripts_build_the_same_command() {
        let typed = BrowserRequest::new("http://x")
            .script(vec![ScriptAction::click(".next a")])
            .build()
            .unwrap();
        let raw = BrowserRequest::new("http://x")
            .raw_script(json!([{"action": "click", "args": {"css_selector": ".next a"}}]))
            .build()
            .unwrap();

        let json = |request: &Request| BrowserOptions::of(request).unwrap().command.to_json().unwrap();
        assert_eq!(json(&typed), json(&raw));
    }

    #[test]
    fn non_sequence_script_becomes_empty() {
        let request = BrowserRequest::new("http://x")
            .raw_script(json!({"action": "extract"}))
            .build()
            .unwrap();
        assert!(BrowserOptions::of(&request).unwrap().command.script().is_empty());
    }

    #[test]
    fn malformed_script_fails_build() {
        let err = BrowserRequest::new("http://x")
            .raw_script(json!([{"action": "wait", "args": {"seconds": "soon"}}]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SpiderError::InvalidScript(_)));
    }

    #[test]
    fn endpoint_overrides_come_from_builder_or_meta() {
        let meta = object(json!({
            "browser": {"endpoint": "execute.json", "browser_url": "http://render:9000/"}
        }));
        let from_meta = BrowserRequest::new("http://x").meta(meta.clone()).build().unwrap();
        let options = BrowserOptions::of(&from_meta).unwrap();
        assert_eq!(options.endpoint.as_deref(), Some("execute.json"));
        assert_eq!(options.browser_url.as_ref().map(Url::as_str), Some("http://render:9000/"));

        let explicit = BrowserRequest::new("http://x")
            .meta(meta)
            .endpoint("run.json")
            .build()
            .unwrap();
        assert_eq!(
            BrowserOptions::of(&explicit).unwrap().endpoint.as_deref(),
            Some("run.json")
        );
    }

    #[test]
    fn hand_built_requests_resolve_from_meta() {
        let request = Request::new(Url::parse("http://example.com/#top").unwrap()).with_meta(
            BROWSER_META,
            json!({"args": {"script": [{"action": "extract"}], "js": true}}),
        );
        let options = BrowserOptions::resolve(&request).unwrap().unwrap();

        assert_eq!(options.command.target_url(), "http://example.com/#top");
        assert_eq!(options.command.script(), &[ScriptAction::Extract]);
        assert_eq!(options.command.extra_args().get("js"), Some(&json!(true)));

        let plain = Request::new(Url::parse("http://example.com").unwrap());
        assert!(BrowserOptions::resolve(&plain).unwrap().is_none());
    }

    #[test]
    fn identical_commands_serialize_to_identical_bytes() {
        let first = BrowserCommand::from_args(
            object(json!({"zeta": 1, "alpha": {"b": 2, "a": 1}, "url": "http://x"})),
            "http://x",
        )
        .unwrap();
        let second = BrowserCommand::from_args(
            object(json!({"alpha": {"a": 1, "b": 2}, "url": "http://x", "zeta": 1})),
            "http://x",
        )
        .unwrap();

        let body = first.to_json().unwrap();
        assert_eq!(body, second.to_json().unwrap());
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"alpha":{"a":1,"b":2},"script":[],"url":"http://x","zeta":1}"#
        );
    }

    #[test]
    fn canonical_json_sorts_nested_script_args() {
        let command = BrowserCommand::new(
            "http://x",
            vec![ScriptAction::while_matches("li:nth-child({index})", 1, vec![])],
        );
        let body = String::from_utf8(command.to_json().unwrap()).unwrap();
        assert_eq!(
            body,
            r#"{"script":[{"action":"while","args":{"script":[],"selector":"li:nth-child({index})","start":1}}],"url":"http://x"}"#
        );
    }
}
