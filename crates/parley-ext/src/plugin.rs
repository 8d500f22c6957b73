// ABOUTME: Plugin contributions and the flattened PluginTable the UI reads from.
// ABOUTME: Also defines MarkdownRenderer, a transform applied to rendered markdown.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A page an extension adds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContribution {
    pub path: String,
    pub title: String,
}

impl RouteContribution {
    pub fn new(path: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }
}

/// Something shown inside the prompt composer or its toolbar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetContribution {
    pub id: String,
    pub label: String,
}

impl WidgetContribution {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Transforms assistant markdown before it is displayed.
pub trait MarkdownRenderer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn render(&self, markdown: &str) -> String;
}

/// Everything one extension (or the host itself) contributes to the UI.
#[derive(Debug, Clone, Default)]
pub struct Plugin {
    pub routes: Vec<RouteContribution>,
    pub composer: Vec<WidgetContribution>,
    pub tools: Vec<WidgetContribution>,
    /// Named content slots, e.g. "empty-state"
    pub content: BTreeMap<String, String>,
    pub renderers: Vec<Arc<dyn MarkdownRenderer>>,
}

impl Plugin {
    pub fn route(mut self, path: impl Into<String>, title: impl Into<String>) -> Self {
        self.routes.push(RouteContribution::new(path, title));
        self
    }

    pub fn composer(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.composer.push(WidgetContribution::new(id, label));
        self
    }

    pub fn tool(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.tools.push(WidgetContribution::new(id, label));
        self
    }

    pub fn content(mut self, slot: impl Into<String>, value: impl Into<String>) -> Self {
        self.content.insert(slot.into(), value.into());
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        self.renderers.push(renderer);
        self
    }
}

/// All plugins flattened into one table.
///
/// List contributions keep plugin order. For content slots, later plugins
/// override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct PluginTable {
    pub routes: Vec<RouteContribution>,
    pub composer: Vec<WidgetContribution>,
    pub tools: Vec<WidgetContribution>,
    pub content: BTreeMap<String, String>,
    pub renderers: Vec<Arc<dyn MarkdownRenderer>>,
}

impl PluginTable {
    pub fn compose(plugins: impl IntoIterator<Item = Plugin>) -> Self {
        plugins
            .into_iter()
            .fold(Self::default(), |mut table, plugin| {
                table.routes.extend(plugin.routes);
                table.composer.extend(plugin.composer);
                table.tools.extend(plugin.tools);
                table.content.extend(plugin.content);
                table.renderers.extend(plugin.renderers);
                table
            })
    }

    pub fn route(&self, path: &str) -> Option<&RouteContribution> {
        self.routes.iter().find(|r| r.path == path)
    }

    /// Run every renderer over `markdown`, in order
    pub fn render_markdown(&self, markdown: &str) -> String {
        self.renderers
            .iter()
            .fold(markdown.to_string(), |text, renderer| renderer.render(&text))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.composer.is_empty()
            && self.tools.is_empty()
            && self.content.is_empty()
            && self.renderers.is_empty()
    }
}

/// Numbers each paragraph with a citation marker: ` [0]`, ` [1]`, ...
#[derive(Debug, Default)]
pub struct CitationMarkers;

impl MarkdownRenderer for CitationMarkers {
    fn name(&self) -> &str {
        "citations"
    }

    fn render(&self, markdown: &str) -> String {
        let mut index = 0;
        markdown
            .split("\n\n")
            .map(|block| {
                if block.trim().is_empty() || block.trim_start().starts_with("```") {
                    return block.to_string();
                }
                let trimmed = block.trim_end();
                let marked = format!("{trimmed} [{index}]{}", &block[trimmed.len()..]);
                index += 1;
                marked
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Upper;

    impl MarkdownRenderer for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn render(&self, markdown: &str) -> String {
            markdown.to_uppercase()
        }
    }

    #[derive(Debug)]
    struct Suffix(&'static str);

    impl MarkdownRenderer for Suffix {
        fn name(&self) -> &str {
            "suffix"
        }
        fn render(&self, markdown: &str) -> String {
            format!("{markdown}{}", self.0)
        }
    }

    #[test]
    fn test_compose_flattens_in_order() {
        let core = Plugin::default()
            .route("/", "Chat")
            .composer("send", "Send")
            .content("empty-state", "Ask me anything");
        let ext = Plugin::default()
            .route("/collections", "Collections")
            .tool("tokens", "Token count")
            .content("empty-state", "Pick a collection");

        let table = PluginTable::compose(vec![core, ext]);
        let paths: Vec<_> = table.routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/collections"]);
        assert_eq!(table.composer.len(), 1);
        assert_eq!(table.tools[0].id, "tokens");
        assert_eq!(table.content["empty-state"], "Pick a collection");
        assert_eq!(table.route("/collections").unwrap().title, "Collections");
        assert!(table.route("/missing").is_none());
    }

    #[test]
    fn test_compose_empty() {
        let table = PluginTable::compose(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.render_markdown("same"), "same");
    }

    #[test]
    fn test_renderers_apply_in_order() {
        let table = PluginTable::compose(vec![
            Plugin::default().renderer(Arc::new(Suffix("!"))),
            Plugin::default().renderer(Arc::new(Upper)),
        ]);
        assert_eq!(table.render_markdown("hi"), "HI!");

        let table = PluginTable::compose(vec![
            Plugin::default().renderer(Arc::new(Suffix("x"))),
            Plugin::default().renderer(Arc::new(Upper)),
        ]);
        assert_eq!(table.render_markdown("a"), "AX");
    }

    #[test]
    fn test_citation_markers() {
        let rendered = CitationMarkers.render("First point.\n\nSecond point.\n\n```\ncode\n```");
        insta::assert_snapshot!(rendered, @r"
        First point. [0]

        Second point. [1]

        ```
        code
        ```
        ");
    }

    #[test]
    fn test_citation_markers_keep_trailing_newline() {
        assert_eq!(CitationMarkers.render("One\n"), "One [0]\n");
        assert_eq!(CitationMarkers.render(""), "");
    }
}
