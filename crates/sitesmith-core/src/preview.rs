//! Live preview bridge.
//!
//! An editable preview is the stored document with a helper `<style>` and
//! `<script>` injected before `</body>`. The helper lets the user click an
//! element, reports it to the host page and applies edits the host sends back.
//! [`clean_document`] removes every trace of the helper so an edited document
//! can be saved.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SitesmithError};
use crate::model::{validate_code, Project};
use crate::projects::owned_project;
use crate::storage::StorageBackend;

pub const SELECTED_CLASS: &str = "ai-selected-element";
pub const SELECTED_ATTR: &str = "data-ai-selected";
pub const HELPER_STYLE_ID: &str = "ai-preview-style";
pub const HELPER_SCRIPT_ID: &str = "ai-preview-script";

/// Inline style properties the host may edit, in the camelCase form the
/// frame's `element.style` uses.
pub const EDITABLE_STYLES: &[&str] = &["padding", "margin", "fontSize", "backgroundColor", "color"];

/// Injected into editable previews. Must not contain a closing `body` tag.
pub const PREVIEW_HELPER: &str = r##"<style id="ai-preview-style">
.ai-selected-element { outline: 2px solid #6366f1 !important; outline-offset: 2px; }
body *:hover { cursor: pointer; }
</style><script id="ai-preview-script">
(function () {
  var EDITABLE = ['padding', 'margin', 'fontSize', 'backgroundColor', 'color'];
  var selected = null;

  function snapshot(el) {
    var cs = window.getComputedStyle(el);
    return {
      tagName: el.tagName,
      className: (el.getAttribute('class') || '').replace(/\bai-selected-element\b/g, '').trim(),
      text: el.innerText || '',
      styles: {
        padding: cs.padding,
        margin: cs.margin,
        fontSize: cs.fontSize,
        backgroundColor: cs.backgroundColor,
        color: cs.color
      }
    };
  }

  function clear() {
    if (!selected) return;
    selected.classList.remove('ai-selected-element');
    selected.removeAttribute('data-ai-selected');
    selected.style.outline = '';
    if (!selected.getAttribute('class')) selected.removeAttribute('class');
    if (!selected.getAttribute('style')) selected.removeAttribute('style');
    selected = null;
  }

  function select(el) {
    clear();
    selected = el;
    el.classList.add('ai-selected-element');
    el.setAttribute('data-ai-selected', 'true');
    el.style.outline = '2px solid #6366f1';
    window.parent.postMessage({ type: 'ELEMENT_SELECTED', payload: snapshot(el) }, '*');
  }

  document.addEventListener('click', function (e) {
    e.preventDefault();
    e.stopPropagation();
    var el = e.target;
    if (!(el instanceof HTMLElement) || el === document.body || el === document.documentElement) {
      clear();
      window.parent.postMessage({ type: 'CLEAR_SELECTION' }, '*');
      return;
    }
    select(el);
  }, true);

  window.addEventListener('message', function (e) {
    var msg = e.data || {};
    if (msg.type === 'CLEAR_SELECTION_REQUEST') {
      clear();
      return;
    }
    if (msg.type !== 'UPDATE_ELEMENT' || !selected) return;
    var p = msg.payload || {};
    if (typeof p.text === 'string') selected.innerText = p.text;
    if (typeof p.className === 'string') {
      selected.className = p.className;
      selected.classList.add('ai-selected-element');
    }
    if (p.styles) {
      for (var k in p.styles) {
        if (EDITABLE.indexOf(k) >= 0) selected.style[k] = p.styles[k];
      }
    }
    window.parent.postMessage({ type: 'ELEMENT_SELECTED', payload: snapshot(selected) }, '*');
  });
})();
</script>"##;

// -- Protocol --

/// Messages exchanged between the host page and the preview frame over
/// `postMessage`, as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    /// host → frame: edit the selected element.
    UpdateElement(ElementUpdate),
    /// host → frame: drop the current selection.
    ClearSelectionRequest,
    /// frame → host: an element was selected or changed.
    ElementSelected(ElementSnapshot),
    /// frame → host: the selection was dropped.
    ClearSelection,
}

impl BridgeMessage {
    pub fn is_host_to_frame(&self) -> bool {
        matches!(self, Self::UpdateElement(_) | Self::ClearSelectionRequest)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<StylePatch>,
}

/// Partial style edit. Only the editable properties are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StylePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub tag_name: String,
    pub class_name: String,
    pub text: String,
    pub styles: ElementStyles,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyles {
    pub padding: String,
    pub margin: String,
    pub font_size: String,
    pub background_color: String,
    pub color: String,
}

// -- Injection & cleanup --

static HELPER_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| helper_block_re("style", HELPER_STYLE_ID));

static HELPER_SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| helper_block_re("script", HELPER_SCRIPT_ID));

/// A start tag. Quoted attribute values may contain `>`.
static START_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<[a-zA-Z][^\s/>]*(?:\s+[^\s=>]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+))?)*\s*/?>"#,
    )
    .expect("start tag regex")
});

/// One attribute inside a start tag: leading space, name, and the optional
/// `=value` part with its quotes.
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s+)([^\s=>]+)(?:(\s*=\s*)("[^"]*"|'[^']*'|[^\s>]+))?"#)
        .expect("attribute regex")
});

fn helper_block_re(element: &str, id: &str) -> Regex {
    Regex::new(&format!(
        r#"(?is)<{element}\b[^>]*\bid\s*=\s*["']{}["'][^>]*>.*?</{element}\s*>"#,
        regex::escape(id)
    ))
    .expect("helper block regex")
}

/// Prepare a stored document for the preview frame. When `editable` is set
/// the helper goes right before the last `</body>`, or at the end if there is
/// none.
pub fn inject(html: &str, editable: bool) -> String {
    if !editable || html.is_empty() {
        return html.to_string();
    }

    // ASCII lowercasing keeps byte offsets intact.
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + PREVIEW_HELPER.len());
            out.push_str(&html[..at]);
            out.push_str(PREVIEW_HELPER);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{PREVIEW_HELPER}"),
    }
}

/// Remove the helper elements and selection markers from a document. A
/// document that went through [`inject`] without edits comes back unchanged.
pub fn clean_document(html: &str) -> String {
    let without_helper = HELPER_STYLE_RE.replace_all(html, "");
    let without_helper = HELPER_SCRIPT_RE.replace_all(&without_helper, "");

    START_TAG_RE
        .replace_all(&without_helper, |caps: &Captures| {
            let tag = &caps[0];
            if tag.contains(SELECTED_CLASS) || tag.to_ascii_lowercase().contains(SELECTED_ATTR) {
                clean_tag(tag)
            } else {
                tag.to_string()
            }
        })
        .into_owned()
}

fn clean_tag(tag: &str) -> String {
    let name_end = tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    let (name, attrs) = tag.split_at(name_end);

    let attrs = ATTR_RE.replace_all(attrs, |caps: &Captures| {
        let Some(raw_value) = caps.get(4).map(|m| m.as_str()) else {
            return if caps[2].eq_ignore_ascii_case(SELECTED_ATTR) {
                String::new()
            } else {
                caps[0].to_string()
            };
        };
        let (quote, value) = unquote(raw_value);
        let rebuild = |value: &str| {
            format!("{}{}{}{quote}{value}{quote}", &caps[1], &caps[2], &caps[3])
        };

        match caps[2].to_ascii_lowercase().as_str() {
            SELECTED_ATTR => String::new(),
            "class" if value.split_whitespace().any(|c| c == SELECTED_CLASS) => {
                let classes: Vec<&str> = value
                    .split_whitespace()
                    .filter(|c| *c != SELECTED_CLASS)
                    .collect();
                if classes.is_empty() {
                    String::new()
                } else {
                    rebuild(&classes.join(" "))
                }
            }
            "style" => match strip_outline(value) {
                Some(kept) if kept.trim().is_empty() => String::new(),
                Some(kept) => rebuild(&kept),
                None => caps[0].to_string(),
            },
            _ => caps[0].to_string(),
        }
    });

    format!("{name}{attrs}")
}

fn unquote(raw: &str) -> (&str, &str) {
    for quote in ["\"", "'"] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return (quote, inner);
        }
    }
    ("", raw)
}

/// Drop `outline` declarations from an inline style. Every other declaration
/// is copied byte for byte. `None` when there was nothing to drop.
fn strip_outline(style: &str) -> Option<String> {
    let declarations = split_declarations(style);
    let is_outline = |decl: &str| {
        decl.split_once(':')
            .is_some_and(|(property, _)| property.trim().eq_ignore_ascii_case("outline"))
    };
    if !declarations.iter().any(|d| is_outline(d)) {
        return None;
    }

    let kept: String = declarations.into_iter().filter(|d| !is_outline(d)).collect();
    Some(kept.trim_start().to_string())
}

/// Split an inline style after each top-level `;`, keeping the separator
/// with its declaration. Semicolons inside character references (`&quot;`),
/// quoted strings (literal or entity-encoded) and parentheses do not split.
fn split_declarations(style: &str) -> Vec<&str> {
    // `&` marks a string opened by an encoded quote.
    const ENCODED: u8 = b'&';

    let bytes = style.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'&' {
            let len = char_ref_len(&bytes[i..]);
            if len > 0 {
                if is_quote_ref(&style[i..i + len]) {
                    match quote {
                        None => quote = Some(ENCODED),
                        Some(ENCODED) => quote = None,
                        Some(_) => {}
                    }
                }
                i += len;
                continue;
            }
        }
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b';' if depth == 0 => {
                    parts.push(&style[start..=i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    if start < style.len() {
        parts.push(&style[start..]);
    }
    parts
}

fn is_quote_ref(reference: &str) -> bool {
    ["&quot;", "&#34;", "&#x22;", "&apos;", "&#39;", "&#x27;"]
        .iter()
        .any(|q| reference.eq_ignore_ascii_case(q))
}

/// Length of a character reference like `&quot;` or `&#34;` at the start of
/// `bytes`, or 0.
fn char_ref_len(bytes: &[u8]) -> usize {
    let body = bytes
        .iter()
        .skip(1)
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'#')
        .count();
    if body > 0 && bytes.get(1 + body) == Some(&b';') {
        body + 2
    } else {
        0
    }
}

// -- Operations --

/// The owner's current document, with the editing helper when `editable`.
pub async fn render_preview(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
    editable: bool,
) -> Result<String> {
    let project = owned_project(storage, project_id, user_id).await?;
    let code = project
        .current_code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SitesmithError::NotFound(format!("project {project_id} has no code yet")))?;
    Ok(inject(&code, editable))
}

/// Persist a hand-edited document as the current snapshot. No version is
/// created and the version pointer is cleared.
pub async fn save_project_code(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
    code: &str,
) -> Result<Project> {
    validate_code(code)?;
    owned_project(storage, project_id, user_id).await?;

    let cleaned = clean_document(code);
    if cleaned.trim().is_empty() {
        return Err(SitesmithError::InvalidInput("code is required".into()));
    }

    storage.set_current_code(project_id, &cleaned, "").await?;
    tracing::info!(%project_id, user_id, bytes = cleaned.len(), "project code saved");
    storage.get_project(project_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{User, Version};
    use crate::storage::SqliteStorage;

    const DOC: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><title>Shop</title></head>\n\
                       <body class=\"bg-white\">\n<h1 class=\"text-3xl font-bold\" style=\"color: red;\">Shop</h1>\n\
                       <script>console.log('hi')</script>\n</body>\n</html>\n";

    #[test]
    fn inject_before_closing_body() {
        let out = inject(DOC, true);
        let helper_at = out.find(PREVIEW_HELPER).unwrap();
        let body_at = out.rfind("</body>").unwrap();
        assert_eq!(helper_at + PREVIEW_HELPER.len(), body_at);
    }

    #[test]
    fn inject_appends_without_body() {
        let out = inject("<h1>Hi</h1>", true);
        assert_eq!(out, format!("<h1>Hi</h1>{PREVIEW_HELPER}"));
    }

    #[test]
    fn inject_handles_uppercase_body() {
        let out = inject("<BODY><p>x</p></BODY>", true);
        assert!(out.ends_with(&format!("{PREVIEW_HELPER}</BODY>")));
    }

    #[test]
    fn inject_read_only_is_identity() {
        assert_eq!(inject(DOC, false), DOC);
        assert_eq!(inject("", true), "");
    }

    #[test]
    fn helper_never_closes_body() {
        assert!(!PREVIEW_HELPER.to_ascii_lowercase().contains("</body>"));
        for style in EDITABLE_STYLES {
            assert!(PREVIEW_HELPER.contains(&format!("'{style}'")));
        }
    }

    #[test]
    fn inject_then_clean_is_byte_identical() {
        for doc in [DOC, "<h1>Hi</h1>", "<html><body></body></html>"] {
            assert_eq!(clean_document(&inject(doc, true)), doc);
        }
    }

    #[test]
    fn clean_strips_selection_markers() {
        let edited = "<body><h1 class=\"text-3xl ai-selected-element\" data-ai-selected=\"true\" \
                      style=\"color: blue; outline: rgb(99, 102, 241) solid 2px;\">Shop</h1></body>";
        assert_eq!(
            clean_document(edited),
            "<body><h1 class=\"text-3xl\" style=\"color: blue;\">Shop</h1></body>"
        );
    }

    #[test]
    fn clean_drops_attributes_left_empty() {
        let edited =
            "<p class=\"ai-selected-element\" data-ai-selected=\"true\" style=\"outline: 2px solid #6366f1;\">x</p>";
        assert_eq!(clean_document(edited), "<p>x</p>");
    }

    #[test]
    fn clean_leaves_unmarked_outlines_alone() {
        let doc = "<button style=\"outline: none;\">Go</button>";
        assert_eq!(clean_document(doc), doc);
    }

    #[test]
    fn clean_handles_gt_inside_attribute_values() {
        let edited = "<button x-show=\"count > 0\" onclick=\"if(a>b){go()}\" \
                      class=\"btn ai-selected-element\" data-ai-selected=\"true\" \
                      style=\"outline: 2px solid #6366f1;\">Go</button>";
        let out = clean_document(edited);
        assert!(!out.contains("ai-selected"));
        assert!(!out.contains("outline"));
        assert_eq!(
            out,
            "<button x-show=\"count > 0\" onclick=\"if(a>b){go()}\" class=\"btn\">Go</button>"
        );
    }

    #[test]
    fn clean_keeps_encoded_quotes_in_styles_intact() {
        let edited = "<h1 class=\"ai-selected-element\" data-ai-selected=\"true\" \
                      style=\"font-family: &quot;Inter&quot;, sans-serif; outline: 2px solid #6366f1;\">Hi</h1>";
        assert_eq!(
            clean_document(edited),
            "<h1 style=\"font-family: &quot;Inter&quot;, sans-serif;\">Hi</h1>"
        );

        let edited = "<div data-ai-selected=\"true\" style=\"outline: 2px solid #6366f1; \
                      background: url(&quot;data:image/png;base64,AAAA&quot;);margin:0\">x</div>";
        assert_eq!(
            clean_document(edited),
            "<div style=\"background: url(&quot;data:image/png;base64,AAAA&quot;);margin:0\">x</div>"
        );
    }

    #[test]
    fn clean_keeps_single_quoted_and_bare_attributes() {
        let edited = "<input data-ai-selected class='field ai-selected-element' disabled \
                      value='a > b'/>";
        assert_eq!(clean_document(edited), "<input class='field' disabled value='a > b'/>");
    }

    #[test]
    fn split_declarations_respects_nesting() {
        assert_eq!(
            split_declarations("a: 1; b: url(x;y); c: 'p;q'; d: &quot;r;s&quot;"),
            vec!["a: 1;", " b: url(x;y);", " c: 'p;q';", " d: &quot;r;s&quot;"]
        );
    }

    #[test]
    fn helper_ids_match_injected_markup() {
        assert!(PREVIEW_HELPER.contains(&format!("id=\"{HELPER_STYLE_ID}\"")));
        assert!(PREVIEW_HELPER.contains(&format!("id=\"{HELPER_SCRIPT_ID}\"")));
        assert!(HELPER_STYLE_RE.is_match(PREVIEW_HELPER));
        assert!(HELPER_SCRIPT_RE.is_match(PREVIEW_HELPER));
    }

    #[test]
    fn clean_removes_serialized_helper_variants() {
        let doc = "<body><p>x</p><style id='ai-preview-style'>.a{}</style>\
                   <script id=\"ai-preview-script\" type=\"text/javascript\">var a = 1;</script></body>";
        assert_eq!(clean_document(doc), "<body><p>x</p></body>");
    }

    #[test]
    fn bridge_message_wire_format() {
        let update: BridgeMessage = serde_json::from_str(
            r##"{"type":"UPDATE_ELEMENT","payload":{"styles":{"backgroundColor":"#fff"}}}"##,
        )
        .unwrap();
        assert_eq!(
            update,
            BridgeMessage::UpdateElement(ElementUpdate {
                styles: Some(StylePatch {
                    background_color: Some("#fff".into()),
                    ..Default::default()
                }),
                ..Default::default()
            })
        );
        assert!(update.is_host_to_frame());

        let clear = serde_json::to_value(BridgeMessage::ClearSelectionRequest).unwrap();
        assert_eq!(clear, serde_json::json!({"type": "CLEAR_SELECTION_REQUEST"}));

        let text: BridgeMessage =
            serde_json::from_str(r#"{"type":"UPDATE_ELEMENT","payload":{"text":"Hello"}}"#).unwrap();
        assert!(matches!(
            text,
            BridgeMessage::UpdateElement(ElementUpdate { text: Some(ref t), .. }) if t == "Hello"
        ));
    }

    #[test]
    fn element_selected_uses_camel_case() {
        let msg = BridgeMessage::ElementSelected(ElementSnapshot {
            tag_name: "H1".into(),
            class_name: "text-3xl".into(),
            text: "Shop".into(),
            styles: ElementStyles {
                font_size: "30px".into(),
                ..Default::default()
            },
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ELEMENT_SELECTED");
        assert_eq!(json["payload"]["tagName"], "H1");
        assert_eq!(json["payload"]["styles"]["fontSize"], "30px");
        assert!(!msg.is_host_to_frame());
    }

    #[test]
    fn style_patch_rejects_other_properties() {
        let res: std::result::Result<BridgeMessage, _> = serde_json::from_str(
            r#"{"type":"UPDATE_ELEMENT","payload":{"styles":{"position":"fixed"}}}"#,
        );
        assert!(res.is_err());
    }

    async fn project_with_version(storage: &SqliteStorage) -> Project {
        storage
            .save_user(&User::new("u1", "Ana", "ana@example.com"))
            .await
            .unwrap();
        let project = Project::new("u1".into(), "shop".into(), 50);
        storage.create_project(&project).await.unwrap();
        storage
            .commit_version(&Version::new(project.id, DOC.into(), "Initial version"))
            .await
            .unwrap();
        storage.get_project(project.id).await.unwrap()
    }

    #[tokio::test]
    async fn save_clears_pointer_without_new_version() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let project = project_with_version(&storage).await;
        assert!(!project.current_version_index.is_empty());

        let edited = inject(&DOC.replace("Shop</h1>", "Boutique</h1>"), true);
        let saved = save_project_code(&storage, project.id, "u1", &edited)
            .await
            .unwrap();

        assert_eq!(saved.current_version_index, "");
        assert_eq!(
            saved.current_code.as_deref(),
            Some(DOC.replace("Shop</h1>", "Boutique</h1>").as_str())
        );
        assert_eq!(storage.list_versions(project.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_rejects_blank_code() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let project = project_with_version(&storage).await;
        for code in ["", "   ", PREVIEW_HELPER] {
            assert!(matches!(
                save_project_code(&storage, project.id, "u1", code).await,
                Err(SitesmithError::InvalidInput(_))
            ));
        }
        let reloaded = storage.get_project(project.id).await.unwrap();
        assert_eq!(reloaded.current_code.as_deref(), Some(DOC));
    }

    #[tokio::test]
    async fn save_by_stranger_is_not_found() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let project = project_with_version(&storage).await;
        assert!(matches!(
            save_project_code(&storage, project.id, "u2", "<p>x</p>").await,
            Err(SitesmithError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn render_preview_injects_when_editable() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let project = project_with_version(&storage).await;
        let plain = render_preview(&storage, project.id, "u1", false).await.unwrap();
        assert_eq!(plain, DOC);
        let editable = render_preview(&storage, project.id, "u1", true).await.unwrap();
        assert!(editable.contains(HELPER_SCRIPT_ID));
    }
}
