use std::sync::LazyLock;

use handlebars::Handlebars;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Values substituted into `{{placeholders}}` of labels and paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,
}

impl LabelContext {
    pub fn for_product(title: impl Into<String>) -> Self {
        Self {
            product_title: Some(title.into()),
        }
    }
}

/// Renders label placeholders. Labels carry HTML, so nothing is escaped.
pub struct LabelRenderer {
    registry: Handlebars<'static>,
}

impl Default for LabelRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    /// Falls back to the raw text when the label is not a valid template.
    pub fn render(&self, text: &str, ctx: &LabelContext) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        let data = json!({ "title": ctx.product_title.as_deref().unwrap_or_default() });
        match self.registry.render_template(text, &data) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(error = %err, "label placeholder rendering failed");
                text.to_string()
            }
        }
    }
}

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[^>]+(>|$)").expect("valid tag pattern"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid space pattern"));

/// Strips tags, decodes the common entities and collapses whitespace so two
/// rich-text labels can be compared by their visible text.
pub fn normalize_html(html: &str) -> String {
    let stripped = TAG.replace_all(html, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    SPACES.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_placeholder_uses_product_title() {
        let renderer = LabelRenderer::new();
        let ctx = LabelContext::for_product("Demande de logement");
        assert_eq!(
            renderer.render("<p>Service <b>{{title}}</b></p>", &ctx),
            "<p>Service <b>Demande de logement</b></p>"
        );
    }

    #[test]
    fn missing_title_renders_empty() {
        let renderer = LabelRenderer::new();
        assert_eq!(
            renderer.render("Service {{title}}.", &LabelContext::default()),
            "Service ."
        );
    }

    #[test]
    fn broken_template_falls_back_to_raw_text() {
        let renderer = LabelRenderer::new();
        let raw = "Service {{#if}}";
        assert_eq!(renderer.render(raw, &LabelContext::default()), raw);
    }

    #[test]
    fn normalize_html_collapses_decoded_spaces() {
        assert_eq!(normalize_html("a &nbsp; b"), "a b");
        assert_eq!(normalize_html("<p>&nbsp;Bonjour&nbsp;&nbsp;</p>"), "Bonjour");
        assert_eq!(normalize_html("R&amp;D"), "R&D");
    }

    #[test]
    fn normalize_html_compares_visible_text() {
        assert_eq!(
            normalize_html("<p>Aidez-nous&nbsp;à   <b>améliorer</b></p>\n<p>l&#39;accueil</p>"),
            "Aidez-nous à améliorer l'accueil"
        );
    }
}
