//! Request identity types: [`Selector`] and [`PropertyAccessQuery`].

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context qualifier narrowing which instance of a property is addressed.
///
/// The empty selector addresses the default context.
#[derive(Clone, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Selector(String);

impl Selector {
    /// Create a new selector from a string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the selector as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this selector addresses the default context.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&Selector> for Selector {
    fn from(value: &Selector) -> Self {
        value.clone()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({:?})", self.0)
    }
}

/// Immutable identity of a get, set or subscribe request.
///
/// Equality and hashing are structural, so two queries built from the same
/// device, property, selector and data filters are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAccessQuery {
    device: String,
    property: String,
    selector: Selector,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    data_filters: BTreeMap<String, Value>,
}

impl PropertyAccessQuery {
    /// Create a query without data filters.
    pub fn new(
        device: impl Into<String>,
        property: impl Into<String>,
        selector: impl Into<Selector>,
    ) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
            selector: selector.into(),
            data_filters: BTreeMap::new(),
        }
    }

    /// Attach a named data filter to the query.
    pub fn with_data_filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_filters.insert(name.into(), value.into());
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn data_filters(&self) -> &BTreeMap<String, Value> {
        &self.data_filters
    }
}

// serde_json::Value has no Hash impl; its canonical text form is stable for
// equal values, which keeps Hash consistent with Eq.
impl Hash for PropertyAccessQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device.hash(state);
        self.property.hash(state);
        self.selector.hash(state);
        self.data_filters.len().hash(state);
        for (name, value) in &self.data_filters {
            name.hash(state);
            value.to_string().hash(state);
        }
    }
}

impl fmt::Display for PropertyAccessQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}/{}\"", self.device, self.property)?;
        if !self.selector.is_default() {
            write!(f, " @ \"{}\"", self.selector)?;
        }
        if !self.data_filters.is_empty() {
            let filters = serde_json::to_string(&self.data_filters).map_err(|_| fmt::Error)?;
            write!(f, " [DATA FILTERS: {}]", filters)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;

    fn hash_of(query: &PropertyAccessQuery) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        hasher.finish()
    }

    #[rstest]
    #[case("TEST.USER.ALL")]
    #[case("")]
    fn test_selector_display(#[case] value: &str) {
        assert_eq!(Selector::new(value).to_string(), value);
    }

    #[rstest]
    #[case("TEST.USER.ALL", "Selector(\"TEST.USER.ALL\")")]
    #[case("", "Selector(\"\")")]
    fn test_selector_debug(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(format!("{:?}", Selector::new(value)), expected);
    }

    #[rstest]
    #[case("DOM1.GR1.VAL1", "DOM2.GR1.VAL1", false)]
    #[case("DOM1.GR1.VAL1", "DOM1.GR1.VAL1", true)]
    #[case("", "", true)]
    fn test_selector_eq(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        assert_eq!(Selector::new(a) == Selector::new(b), expected);
        assert_eq!(Selector::new(a) != Selector::new(b), !expected);
    }

    #[test]
    fn test_selector_default_context() {
        assert!(Selector::default().is_default());
        assert!(!Selector::from("SOME.TEST.SELECTOR").is_default());
    }

    #[rstest]
    #[case(PropertyAccessQuery::new("dev", "prop", ""), "\"dev/prop\"")]
    #[case(
        PropertyAccessQuery::new("dev", "prop", "SOME.SEL"),
        "\"dev/prop\" @ \"SOME.SEL\""
    )]
    #[case(
        PropertyAccessQuery::new("dev", "prop", "SOME.SEL").with_data_filter("bucket", 3),
        "\"dev/prop\" @ \"SOME.SEL\" [DATA FILTERS: {\"bucket\":3}]"
    )]
    #[case(
        PropertyAccessQuery::new("dev", "prop", "").with_data_filter("mode", "fast"),
        "\"dev/prop\" [DATA FILTERS: {\"mode\":\"fast\"}]"
    )]
    fn test_query_display(#[case] query: PropertyAccessQuery, #[case] expected: &str) {
        assert_eq!(query.to_string(), expected);
    }

    #[test]
    fn test_query_as_map_key() {
        let mut map = HashMap::new();
        map.insert(
            PropertyAccessQuery::new("dev", "prop", "SEL").with_data_filter("n", 1),
            "first",
        );

        let same = PropertyAccessQuery::new("dev", "prop", "SEL").with_data_filter("n", 1);
        assert_eq!(map.get(&same), Some(&"first"));

        let different = PropertyAccessQuery::new("dev", "prop", "SEL").with_data_filter("n", 2);
        assert_eq!(map.get(&different), None);
    }

    proptest! {
        #[test]
        fn prop_equal_queries_are_interchangeable(
            device in "[a-z]{1,8}",
            property in "[a-z]{1,8}",
            selector in "([A-Z]{1,4}\\.){0,2}[A-Z]{0,4}",
            filter in proptest::option::of(0i64..100),
        ) {
            let build = || {
                let query = PropertyAccessQuery::new(device.clone(), property.clone(), selector.as_str());
                match filter {
                    Some(n) => query.with_data_filter("n", n),
                    None => query,
                }
            };
            let a = build();
            let b = build();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
            prop_assert_eq!(a.to_string(), b.to_string());
        }
    }
}
