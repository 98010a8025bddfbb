use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Immutable carrier threaded through every tracer hook of one operation.
///
/// A context is a persistent list of key/value entries. `with_value`
/// never touches the receiver: it returns a new context that shares all
/// existing entries and adds one on top, so clones handed to concurrent
/// operations can never observe each other's state.
///
/// Lookups compare both the key's type and its value. A key type that
/// is private to a module makes its entries unreachable from anywhere
/// else.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Entry>>,
}

struct Entry {
    key: Box<dyn Any + Send + Sync>,
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context with `value` attached under `key`.
    /// An existing entry with an equal key is shadowed, not replaced.
    pub fn with_value<K, V>(&self, key: K, value: V) -> Self
    where
        K: Any + PartialEq + Send + Sync,
        V: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Entry {
                key: Box::new(key),
                value: Box::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Value of the nearest entry stored under `key`.
    ///
    /// Returns `None` when no such entry exists, or when the nearest one
    /// holds something other than a `V`.
    pub fn value<K, V>(&self, key: &K) -> Option<&V>
    where
        K: Any + PartialEq,
        V: Any,
    {
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            if entry.key.downcast_ref::<K>().is_some_and(|k| k == key) {
                return entry.value.downcast_ref::<V>();
            }
            cursor = entry.parent.as_deref();
        }
        None
    }

    /// Number of entries, shadowed ones included.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            count += 1;
            cursor = entry.parent.as_deref();
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("entries", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct KeyA;

    #[derive(Debug, PartialEq)]
    struct KeyB;

    #[derive(Debug, PartialEq)]
    struct Scoped(u64);

    #[test]
    fn empty_context_has_no_values() {
        let ctx = Context::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.value::<_, u32>(&KeyA), None);
    }

    #[test]
    fn with_value_leaves_parent_untouched() {
        let parent = Context::new();
        let child = parent.with_value(KeyA, 7u32);

        assert_eq!(child.value::<_, u32>(&KeyA), Some(&7));
        assert_eq!(parent.value::<_, u32>(&KeyA), None);
        assert_eq!(parent.len(), 0);
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn distinct_key_types_do_not_collide() {
        let ctx = Context::new().with_value(KeyA, 1u32).with_value(KeyB, 2u32);

        assert_eq!(ctx.value::<_, u32>(&KeyA), Some(&1));
        assert_eq!(ctx.value::<_, u32>(&KeyB), Some(&2));
    }

    #[test]
    fn keys_of_same_type_compare_by_value() {
        let ctx = Context::new()
            .with_value(Scoped(1), "first")
            .with_value(Scoped(2), "second");

        assert_eq!(ctx.value::<_, &str>(&Scoped(1)), Some(&"first"));
        assert_eq!(ctx.value::<_, &str>(&Scoped(2)), Some(&"second"));
        assert_eq!(ctx.value::<_, &str>(&Scoped(3)), None);
    }

    #[test]
    fn newest_entry_shadows_older() {
        let ctx = Context::new().with_value(KeyA, 1u32).with_value(KeyA, 2u32);
        assert_eq!(ctx.value::<_, u32>(&KeyA), Some(&2));
    }

    #[test]
    fn mistyped_value_is_none_even_if_older_entry_matches() {
        let ctx = Context::new()
            .with_value(KeyA, 1u32)
            .with_value(KeyA, String::from("oops"));

        assert_eq!(ctx.value::<_, u32>(&KeyA), None);
        assert_eq!(
            ctx.value::<_, String>(&KeyA).map(String::as_str),
            Some("oops")
        );
    }

    #[test]
    fn clones_are_independent_branches() {
        let base = Context::new().with_value(KeyA, 1u32);
        let left = base.clone().with_value(KeyB, 10u32);
        let right = base.with_value(KeyB, 20u32);

        assert_eq!(left.value::<_, u32>(&KeyB), Some(&10));
        assert_eq!(right.value::<_, u32>(&KeyB), Some(&20));
        assert_eq!(left.value::<_, u32>(&KeyA), Some(&1));
    }

    #[test]
    fn context_crosses_threads() {
        let ctx = Context::new().with_value(KeyA, 5u32);
        let seen = std::thread::spawn(move || ctx.value::<_, u32>(&KeyA).copied())
            .join()
            .unwrap();
        assert_eq!(seen, Some(5));
    }
}
