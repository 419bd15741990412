//! Spider module
//!
//! A spider is a named capability pairing fetch parameters (start URL, HTTP
//! method) with a parse function that turns raw page content into
//! structured data. Spiders are plain trait objects registered in a lookup
//! table at process start; the engine core never loads code at runtime.

mod builtin;

pub use builtin::{register_builtins, DefaultSpider, HackerNewsSpider, IpSpider};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by spider parse functions
#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// Result type for spider operations
pub type SpiderResult<T> = Result<T, SpiderError>;

/// HTTP method used for the fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// Fetch parameters a spider supplies for its jobs
#[derive(Debug, Clone, Default)]
pub struct FetchSpec {
    /// Default target URL; submissions may override it. A spider without a
    /// start URL requires the submission to supply one.
    pub start_url: Option<String>,

    /// HTTP method for the fetch
    pub method: HttpMethod,
}

/// A named fetch-and-parse capability
pub trait Spider: Send + Sync {
    /// Registry name of this spider
    fn name(&self) -> &str;

    /// Fetch parameters for jobs running this spider
    fn fetch_spec(&self) -> FetchSpec {
        FetchSpec::default()
    }

    /// Turns raw page content into structured data
    fn parse(
        &self,
        raw_content: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> SpiderResult<serde_json::Value>;
}

/// Lookup table mapping spider names to capabilities
///
/// Populated once at startup and shared read-only between workers and the
/// dispatcher.
#[derive(Default)]
pub struct SpiderRegistry {
    spiders: HashMap<String, Arc<dyn Spider>>,
}

impl SpiderRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all built-in spiders registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Registers a spider under its own name, replacing any previous entry
    pub fn register(&mut self, spider: Arc<dyn Spider>) {
        let name = spider.name().to_string();
        tracing::debug!("Registered spider: {}", name);
        self.spiders.insert(name, spider);
    }

    /// Resolves a spider by name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Spider>> {
        self.spiders.get(name).cloned()
    }

    /// Returns true if a spider with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.spiders.contains_key(name)
    }

    /// Returns the registered spider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.spiders.keys().cloned().collect();
        names.sort();
        names
    }
}
