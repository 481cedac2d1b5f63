use std::marker::PhantomData;

use crate::HasId;

// Vec<Option<V>> keyed by a dense newtype id. Removal leaves a hole so that
// ids handed out earlier stay valid.
// e.g. VecMap<BasicBlockId, BasicBlock>, VecMap<MemoryAccessId, MemoryAccess>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VecMap<K, V> {
    vec: Vec<Option<V>>,
    _marker: PhantomData<fn(K) -> K>,
}

impl<K: From<usize> + Copy, V> Default for VecMap<K, V>
where
    usize: From<K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: From<usize> + Copy, V> VecMap<K, V>
where
    usize: From<K>,
{
    pub fn new() -> Self {
        Self {
            vec: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        let i = usize::from(key);
        if i >= self.vec.len() {
            self.vec.resize_with(i + 1, || None);
        }
        self.vec[i] = Some(value);
    }

    pub fn get(&self, key: K) -> Option<&V> {
        let i = usize::from(key);
        self.vec.get(i).and_then(|opt| opt.as_ref())
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let i = usize::from(key);
        self.vec.get_mut(i).and_then(|opt| opt.as_mut())
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        let i = usize::from(key);
        if i >= self.vec.len() {
            return None;
        }
        self.vec[i].take()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.vec.iter().filter_map(|v| v.as_ref())
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.vec.iter_mut().filter_map(|v| v.as_mut())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.vec
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (K::from(i), v)))
    }

    pub fn next_key(&self) -> K {
        K::from(self.vec.len())
    }

    pub fn push_with<F: FnOnce(K) -> V>(&mut self, f: F) -> K {
        let key = self.next_key();
        let value = f(key);
        self.vec.push(Some(value));
        key
    }
}

impl<K: From<usize> + Copy, V> std::ops::Index<K> for VecMap<K, V>
where
    usize: From<K>,
{
    type Output = V;

    fn index(&self, index: K) -> &Self::Output {
        self.get(index).expect("no entry found for key")
    }
}

impl<K: From<usize> + Copy, V> std::ops::IndexMut<K> for VecMap<K, V>
where
    usize: From<K>,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        self.get_mut(index).expect("no entry found for key")
    }
}

// HasIdを実装している型をnodeと呼ぶ
impl<K: From<usize> + Copy, V: HasId<Id = K>> VecMap<K, V>
where
    usize: From<K>,
{
    pub fn insert_node(&mut self, value: V) {
        let key = value.id();
        self.insert(key, value);
    }
}

impl<K: From<usize> + Copy, V: HasId<Id = K>> FromIterator<V> for VecMap<K, V>
where
    usize: From<K>,
{
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut map = Self::new();
        for v in iter {
            map.insert_node(v);
        }
        map
    }
}
