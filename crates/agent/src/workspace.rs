//! Read-only workspace context used to seed a session.

use async_trait::async_trait;

/// A piece of context the user already has in front of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFragment {
    pub description: String,
    /// Fully qualified names of the code units the fragment covers
    pub sources: Vec<String>,
    pub text: String,
}

impl ContextFragment {
    pub fn new(description: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sources: Vec::new(),
            text: text.into(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn render(&self) -> String {
        format!(
            "<fragment description=\"{}\" sources=\"{}\">\n{}\n</fragment>",
            self.description,
            self.sources.join(", "),
            self.text
        )
    }
}

/// Supplies the current workspace context.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn fragments(&self) -> Vec<ContextFragment>;
}

/// A fixed set of fragments.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    fragments: Vec<ContextFragment>,
}

impl StaticContext {
    pub fn new(fragments: Vec<ContextFragment>) -> Self {
        Self { fragments }
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn fragments(&self) -> Vec<ContextFragment> {
        self.fragments.clone()
    }
}
