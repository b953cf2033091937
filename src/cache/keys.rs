//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod products {
    use super::*;
    use crate::database::product_repository::ProductFilter;

    pub const NAMESPACE: &str = "products";

    /// Cached storefront listing for one filter combination
    #[derive(Debug, Clone)]
    pub struct ListKey {
        pub operator: String,
        pub category: String,
        pub search: String,
    }

    impl ListKey {
        pub fn from_filter(filter: &ProductFilter) -> Self {
            fn part(value: &Option<String>) -> String {
                match value.as_deref().map(str::trim) {
                    Some(v) if !v.is_empty() => v.to_lowercase().replace([':', '*'], "_"),
                    _ => "_".to_string(),
                }
            }

            Self {
                operator: part(&filter.operator),
                category: part(&filter.category),
                search: part(&filter.search),
            }
        }
    }

    impl fmt::Display for ListKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:list:{}:{}:{}",
                VERSION, NAMESPACE, self.operator, self.category, self.search
            )
        }
    }

    /// Pattern matching every key in the namespace
    pub fn namespace_pattern() -> String {
        format!("{}:{}:*", VERSION, NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::product_repository::ProductFilter;

    #[test]
    fn test_product_list_key_defaults() {
        let key = products::ListKey::from_filter(&ProductFilter::default());
        assert_eq!(key.to_string(), "v1:products:list:_:_:_");
    }

    #[test]
    fn test_product_list_key_normalises_parts() {
        let filter = ProductFilter {
            operator: Some("MPT".to_string()),
            category: Some(" data ".to_string()),
            search: Some("1GB:*".to_string()),
        };
        let key = products::ListKey::from_filter(&filter);
        assert_eq!(key.to_string(), "v1:products:list:mpt:data:1gb__");
    }

    #[test]
    fn test_namespace_pattern() {
        assert_eq!(products::namespace_pattern(), "v1:products:*");
    }
}
