use std::fmt;

use super::Candidate;
use crate::domain::experiment::{Metadata, StaticMatcher};

/// Default matcher: every key of the variant's metadata has the same value in
/// the request. Variants without metadata never match.
pub fn metadata_matches(variant: &Metadata, request: &Metadata) -> bool {
    !variant.is_empty()
        && variant
            .iter()
            .all(|(key, value)| request.get(key) == Some(value))
}

/// Picks the first variant whose metadata matches the request
///
/// Falls back to the control variant when nothing matches or the request
/// carries no metadata.
#[derive(Clone, Default)]
pub struct StaticMatch {
    matcher: Option<StaticMatcher>,
}

impl StaticMatch {
    pub fn new(matcher: Option<StaticMatcher>) -> Self {
        Self { matcher }
    }

    fn matches(&self, variant: &Metadata, request: &Metadata) -> bool {
        match &self.matcher {
            Some(matcher) => matcher(variant, request),
            None => metadata_matches(variant, request),
        }
    }

    pub fn choose(&self, candidates: &[Candidate<'_>], metadata: &Metadata) -> Option<usize> {
        let control = || {
            candidates
                .iter()
                .position(|c| c.variant.is_control())
                .or_else(|| (!candidates.is_empty()).then_some(0))
        };

        if metadata.is_empty() {
            return control();
        }

        candidates
            .iter()
            .position(|c| self.matches(c.variant.metadata(), metadata))
            .or_else(control)
    }
}

impl fmt::Debug for StaticMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticMatch")
            .field("custom_matcher", &self.matcher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{Variant, VariantName};
    use serde_json::json;
    use std::sync::Arc;

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    fn variants() -> Vec<Variant> {
        vec![
            Variant::new(VariantName::new("default").unwrap()).with_control(true),
            Variant::new(VariantName::new("mobile").unwrap())
                .with_metadata(metadata(json!({"device": "mobile"}))),
            Variant::new(VariantName::new("tablet").unwrap())
                .with_metadata(metadata(json!({"device": "tablet", "os": "ios"}))),
        ]
    }

    #[test]
    fn test_matching_variant_chosen() {
        let variants = variants();
        let candidates: Vec<_> = variants.iter().map(Candidate::new).collect();
        let algorithm = StaticMatch::default();

        let request = metadata(json!({"device": "mobile", "locale": "en"}));
        assert_eq!(algorithm.choose(&candidates, &request), Some(1));

        let request = metadata(json!({"device": "tablet", "os": "ios"}));
        assert_eq!(algorithm.choose(&candidates, &request), Some(2));
    }

    #[test]
    fn test_falls_back_to_control() {
        let variants = variants();
        let candidates: Vec<_> = variants.iter().map(Candidate::new).collect();
        let algorithm = StaticMatch::default();

        assert_eq!(algorithm.choose(&candidates, &Metadata::new()), Some(0));

        let request = metadata(json!({"device": "tablet", "os": "android"}));
        assert_eq!(algorithm.choose(&candidates, &request), Some(0));
    }

    #[test]
    fn test_custom_matcher() {
        let variants = variants();
        let candidates: Vec<_> = variants.iter().map(Candidate::new).collect();
        let matcher: StaticMatcher = Arc::new(|variant: &Metadata, request: &Metadata| {
            variant.get("device").is_some() && variant.get("device") == request.get("form")
        });
        let algorithm = StaticMatch::new(Some(matcher));

        let request = metadata(json!({"form": "tablet"}));
        assert_eq!(algorithm.choose(&candidates, &request), Some(2));
    }
}
