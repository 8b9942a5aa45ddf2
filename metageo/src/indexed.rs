//! Arena storage with strongly-typed handles.
//!
//! Every piece of topology (blocks, faces, half-edges, patches...) lives in an
//! [`IndexVec`] owned by the geometry, and refers to its peers through small
//! `Copy` handles instead of references.  Arenas are cleared together on each
//! rebuild, so handles never outlive the data they point into.

pub trait Index {
    fn new(i: usize) -> Self;
    fn get(&self) -> usize;
}

/// A `Vec<V>` with strongly-typed indexes, used to improve the type-safety
/// of data storage.
///
/// The `Index` type should be a wrapper around a `usize` and be convertible
/// in both directions; it is typically passed around using `Copy`.  A suitable
/// index type can be constructed with [define_index].
#[derive(Clone, Debug)]
pub struct IndexVec<V, I> {
    data: Vec<V>,
    _phantom: std::marker::PhantomData<fn() -> I>,
}

impl<V, I> Default for IndexVec<V, I> {
    fn default() -> Self {
        Self {
            data: vec![],
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<V, I: Index> IndexVec<V, I> {
    /// Pushes a new value, returning its handle
    pub fn push(&mut self, v: V) -> I {
        let i = I::new(self.data.len());
        self.data.push(v);
        i
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear()
    }

    pub fn get(&self, i: I) -> Option<&V> {
        self.data.get(i.get())
    }

    /// Iterates over every valid handle, in allocation order
    pub fn keys(&self) -> impl Iterator<Item = I> + use<V, I> {
        (0..self.data.len()).map(I::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &V)> {
        self.data.iter().enumerate().map(|(i, v)| (I::new(i), v))
    }

    pub fn values(&self) -> std::slice::Iter<'_, V> {
        self.data.iter()
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<'_, V> {
        self.data.iter_mut()
    }
}

impl<V, I> std::iter::IntoIterator for IndexVec<V, I> {
    type Item = V;
    type IntoIter = std::vec::IntoIter<V>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<V, I> FromIterator<V> for IndexVec<V, I> {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Vec::from_iter(iter).into()
    }
}

impl<V, I> std::ops::Index<I> for IndexVec<V, I>
where
    I: Index,
{
    type Output = V;
    fn index(&self, i: I) -> &V {
        &self.data[i.get()]
    }
}

impl<V, I> std::ops::IndexMut<I> for IndexVec<V, I>
where
    I: Index,
{
    fn index_mut(&mut self, i: I) -> &mut V {
        &mut self.data[i.get()]
    }
}

impl<V, I> From<Vec<V>> for IndexVec<V, I> {
    fn from(data: Vec<V>) -> Self {
        Self {
            data,
            _phantom: std::marker::PhantomData,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Defines an index type suitable for use in an [`IndexVec`].
macro_rules! define_index {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Copy, Clone, Default, Debug, Eq, PartialEq, Hash, Ord, PartialOrd,
        )]
        pub struct $name(usize);
        impl crate::indexed::Index for $name {
            fn new(i: usize) -> Self {
                Self(i)
            }
            fn get(&self) -> usize {
                self.0
            }
        }
    };
}
pub(crate) use define_index;

#[cfg(test)]
mod test {
    use super::*;

    define_index!(Thing, "Test handle");

    #[test]
    fn push_and_index() {
        let mut v: IndexVec<&str, Thing> = IndexVec::default();
        let a = v.push("a");
        let b = v.push("b");
        assert_eq!(v[a], "a");
        assert_eq!(v[b], "b");
        assert_eq!(v.keys().collect::<Vec<_>>(), vec![a, b]);
        v[a] = "c";
        assert_eq!(v.get(a), Some(&"c"));
        v.clear();
        assert!(v.get(a).is_none());
    }
}
