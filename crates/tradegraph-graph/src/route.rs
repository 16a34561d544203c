use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// Identifier of a registered node.
///
/// Any cheap, hashable, printable value qualifies. The trading workflow uses
/// a closed enum; tests use `&'static str`.
pub trait NodeKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> NodeKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Successor of a node: another registered node or the terminal sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route<K> {
    To(K),
    End,
}

impl<K> Route<K> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    pub fn node(&self) -> Option<&K> {
        match self {
            Self::To(k) => Some(k),
            Self::End => None,
        }
    }
}

impl<K> From<K> for Route<K> {
    fn from(key: K) -> Self {
        Self::To(key)
    }
}

impl<K: Display> Display for Route<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::To(k) => write!(f, "{}", k),
            Self::End => f.write_str("__end__"),
        }
    }
}

/// State that carries the routing field the executor reads between visits.
///
/// `route_writes` must count every call to `set_route`; the executor uses it
/// to check that each node visit wrote the field exactly once.
pub trait RoutedState<K>: Send {
    fn current_route(&self) -> Option<&Route<K>>;

    fn set_route(&mut self, route: Route<K>);

    fn route_writes(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_from_key() {
        let r: Route<&str> = "trader".into();
        assert_eq!(r, Route::To("trader"));
        assert_eq!(r.node(), Some(&"trader"));
        assert!(!r.is_end());
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::To("bull").to_string(), "bull");
        assert_eq!(Route::<&str>::End.to_string(), "__end__");
    }
}
