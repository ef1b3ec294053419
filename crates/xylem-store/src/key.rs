//! Store key encoding.
//!
//! Three key families share one byte-ordered keyspace, distinguished by a
//! leading tag byte:
//!
//! | Tag | Family     | Layout after the tag                              |
//! |-----|------------|---------------------------------------------------|
//! | 0   | collection | UTF-8 normalized path                             |
//! | 1   | document   | collection id (BE u32), resource tag, doc id (BE) |
//! | 2   | control    | counter / free-list name (UTF-8)                  |
//!
//! Document keys sort by owning collection first, which is what makes
//! "drop all document metadata of collection N" a single prefix removal.

use xylem_types::{CollectionId, CollectionPath, DocumentId, ResourceType};

/// Tag byte for collection record keys.
pub const TAG_COLLECTION: u8 = 0;
/// Tag byte for document record keys.
pub const TAG_DOCUMENT: u8 = 1;
/// Tag byte for control records (id counters, free lists).
pub const TAG_CONTROL: u8 = 2;

/// Key of a collection record.
#[must_use]
pub fn collection_key(path: &CollectionPath) -> Vec<u8> {
    let s = path.as_str().as_bytes();
    let mut k = Vec::with_capacity(1 + s.len());
    k.push(TAG_COLLECTION);
    k.extend_from_slice(s);
    k
}

/// Decode the path out of a collection key, if it is one.
#[must_use]
pub fn collection_path_from_key(keyb: &[u8]) -> Option<CollectionPath> {
    if keyb.first() != Some(&TAG_COLLECTION) {
        return None;
    }
    let s = std::str::from_utf8(&keyb[1..]).ok()?;
    CollectionPath::normalize(s)
}

/// Key of a document metadata record.
#[must_use]
pub fn document_key(collection: CollectionId, rt: ResourceType, doc: DocumentId) -> Vec<u8> {
    let mut k = Vec::with_capacity(10);
    k.push(TAG_DOCUMENT);
    k.extend_from_slice(&collection.get().to_be_bytes());
    k.push(rt.tag());
    k.extend_from_slice(&doc.get().to_be_bytes());
    k
}

/// Prefix matching every document metadata record of one collection.
#[must_use]
pub fn document_prefix(collection: CollectionId) -> Vec<u8> {
    let mut k = Vec::with_capacity(5);
    k.push(TAG_DOCUMENT);
    k.extend_from_slice(&collection.get().to_be_bytes());
    k
}

/// Key of a named control record.
#[must_use]
pub fn control_key(name: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + name.len());
    k.push(TAG_CONTROL);
    k.extend_from_slice(name.as_bytes());
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_key_round_trips() {
        let p = CollectionPath::normalize("/db/a/b").unwrap();
        let k = collection_key(&p);
        assert_eq!(collection_path_from_key(&k), Some(p));
        assert_eq!(collection_path_from_key(&control_key("x")), None);
    }

    #[test]
    fn document_keys_group_by_collection() {
        let c = CollectionId::new(7).unwrap();
        let d1 = document_key(c, ResourceType::Xml, DocumentId::new(1).unwrap());
        let d2 = document_key(c, ResourceType::Binary, DocumentId::new(2).unwrap());
        let other = document_key(
            CollectionId::new(8).unwrap(),
            ResourceType::Xml,
            DocumentId::new(3).unwrap(),
        );
        let prefix = document_prefix(c);
        assert!(d1.starts_with(&prefix));
        assert!(d2.starts_with(&prefix));
        assert!(!other.starts_with(&prefix));
    }
}
