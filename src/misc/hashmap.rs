use std::collections::HashMap as OriginalHashMap;
use std::collections::HashSet as OriginalHashSet;
use std::hash::BuildHasherDefault;
use twox_hash::XxHash64;

/// Arbitrary HashMap using more performant hashing algorithm
pub type FullHashMap<K, V> = OriginalHashMap<K, V, BuildHasherDefault<XxHash64>>;

/// Hashset using more performant hashing algorithm
pub type FullHashSet<K> = OriginalHashSet<K, BuildHasherDefault<XxHash64>>;

/// HashMap for integer keys that are already well distributed
pub type IntMap<K, V> = nohash_hasher::IntMap<K, V>;
