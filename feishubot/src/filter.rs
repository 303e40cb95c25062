//! Reply filters.
//!
//! Some words or sentences must never leave the bot. Each filter inspects the
//! candidate reply and either passes it through or swaps the whole reply for a
//! fixed replacement. Filters are chosen by name at startup.

use feishubot_common::FilterConfig;

/// A text transformer applied to replies before they are sent.
pub trait MessageFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, text: &str) -> String;
}

// ============================================================================
// Keywords
// ============================================================================

/// Replaces any reply containing one of the prohibited words.
#[derive(Debug, Clone)]
pub struct KeywordsFilter {
    words: Vec<String>,
    replacement: String,
}

impl KeywordsFilter {
    /// Blank words are dropped; an empty word would match every reply.
    pub fn new(words: impl IntoIterator<Item = String>, replacement: impl Into<String>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect(),
            replacement: replacement.into(),
        }
    }

    fn from_config(config: &FilterConfig) -> Box<dyn MessageFilter> {
        Box::new(Self::new(
            config.prohibited_words.iter().cloned(),
            config.replace_text.clone(),
        ))
    }
}

impl MessageFilter for KeywordsFilter {
    fn name(&self) -> &'static str {
        "keywords"
    }

    fn filter(&self, text: &str) -> String {
        if self.words.iter().any(|w| text.contains(w.as_str())) {
            self.replacement.clone()
        } else {
            text.to_string()
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

type FilterConstructor = fn(&FilterConfig) -> Box<dyn MessageFilter>;

/// Filters that can be enabled by name.
const PREDEFINED_FILTERS: &[(&str, FilterConstructor)] = &[("keywords", KeywordsFilter::from_config)];

/// Names accepted in `filter.plugins`.
pub fn available_filters() -> impl Iterator<Item = &'static str> {
    PREDEFINED_FILTERS.iter().map(|(name, _)| *name)
}

fn predefined(name: &str) -> Option<FilterConstructor> {
    PREDEFINED_FILTERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ctor)| *ctor)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered chain of filters; each filter sees the previous one's output.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn MessageFilter>>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn MessageFilter>>) -> Self {
        Self { filters }
    }

    /// Build the pipeline from the configured plugin names, in order.
    ///
    /// Unknown names are skipped.
    pub fn from_config(config: &FilterConfig) -> Self {
        let filters = config
            .plugins
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .filter_map(|name| match predefined(name) {
                Some(ctor) => Some(ctor(config)),
                None => {
                    tracing::warn!(
                        filter = %name,
                        available = ?available_filters().collect::<Vec<_>>(),
                        "Unknown filter, skipping"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(
            filters = ?filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            "Reply filters configured"
        );

        Self::new(filters)
    }

    pub fn apply(&self, text: &str) -> String {
        self.filters
            .iter()
            .fold(text.to_string(), |out, filter| filter.filter(&out))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl MessageFilter for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn filter(&self, text: &str) -> String {
            text.to_uppercase()
        }
    }

    fn config(plugins: &[&str], words: &[&str]) -> FilterConfig {
        FilterConfig {
            plugins: plugins.iter().map(|s| s.to_string()).collect(),
            prohibited_words: words.iter().map(|s| s.to_string()).collect(),
            replace_text: "...".into(),
        }
    }

    #[test]
    fn test_keywords_filter_replaces_whole_text() {
        let f = KeywordsFilter::new(vec!["secret".to_string()], "[removed]");
        assert_eq!(f.filter("the secret plan"), "[removed]");
        assert_eq!(f.filter("a public plan"), "a public plan");
    }

    #[test]
    fn test_keywords_filter_ignores_blank_words() {
        let f = KeywordsFilter::new(vec![String::new(), "  ".to_string()], "...");
        assert_eq!(f.filter("anything"), "anything");
    }

    #[test]
    fn test_pipeline_from_config_skips_unknown() {
        let pipeline = FilterPipeline::from_config(&config(&["nope", "keywords", ""], &["bad"]));
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.apply("bad words"), "...");
        assert_eq!(pipeline.apply("good words"), "good words");
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = FilterPipeline::from_config(&config(&[], &["bad"]));
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.apply("bad words"), "bad words");
    }

    #[test]
    fn test_pipeline_feeds_output_forward() {
        let pipeline = FilterPipeline::new(vec![
            Box::new(KeywordsFilter::new(vec!["x".to_string()], "replaced")),
            Box::new(Upper),
        ]);
        assert_eq!(pipeline.apply("x marks"), "REPLACED");
        assert_eq!(pipeline.apply("plain"), "PLAIN");
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let pipeline = FilterPipeline::new(vec![
            Box::new(KeywordsFilter::new(vec!["alpha".to_string()], "one")),
            Box::new(KeywordsFilter::new(vec!["beta".to_string()], "two")),
        ]);
        for text in ["alpha", "beta", "gamma", "alpha beta"] {
            let once = pipeline.apply(text);
            assert_eq!(pipeline.apply(&once), once);
        }
    }

    #[test]
    fn test_available_filters() {
        assert_eq!(available_filters().collect::<Vec<_>>(), vec!["keywords"]);
    }
}
