use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// On-disk response cache keyed by the canonicalized request
///
/// The key covers method, fully substituted URL, sorted query params, and
/// body, so a crawl resumed after a crash never re-issues a request it has
/// already completed. Entries are plain body files named by key.
#[derive(Debug)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// Opens (creating if needed) a cache directory
    pub fn new(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Computes the cache key for a canonicalized request
    ///
    /// `params` is a BTreeMap so iteration order is already canonical.
    pub fn request_key(
        method: &str,
        url: &str,
        params: &BTreeMap<String, String>,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b" ");
        hasher.update(url.as_bytes());
        for (k, v) in params {
            hasher.update(b"\n");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        if !body.is_empty() {
            hasher.update(b"\n\n");
            hasher.update(crate::storage::canonical_json(&serde_json::Value::Object(body.clone())));
        }
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.body", key))
    }

    /// Returns the cached body for a key, if present
    pub fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.entry_path(key)).ok()
    }

    /// Stores a response body under a key
    pub fn put(&self, key: &str, body: &str) -> std::io::Result<()> {
        std::fs::write(self.entry_path(key), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path()).unwrap();

        let key = ResponseCache::request_key("GET", "/items", &BTreeMap::new(), &Default::default());
        assert!(cache.get(&key).is_none());

        cache.put(&key, "{\"ok\":true}").unwrap();
        assert_eq!(cache.get(&key).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn test_key_depends_on_params() {
        let mut params_a = BTreeMap::new();
        params_a.insert("page".to_string(), "1".to_string());
        let mut params_b = BTreeMap::new();
        params_b.insert("page".to_string(), "2".to_string());

        let a = ResponseCache::request_key("GET", "/items", &params_a, &Default::default());
        let b = ResponseCache::request_key("GET", "/items", &params_b, &Default::default());
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_stable_across_param_insertion_order() {
        let mut params_a = BTreeMap::new();
        params_a.insert("a".to_string(), "1".to_string());
        params_a.insert("b".to_string(), "2".to_string());
        let mut params_b = BTreeMap::new();
        params_b.insert("b".to_string(), "2".to_string());
        params_b.insert("a".to_string(), "1".to_string());

        let a = ResponseCache::request_key("GET", "/items", &params_a, &Default::default());
        let b = ResponseCache::request_key("GET", "/items", &params_b, &Default::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_depends_on_method_and_body() {
        let mut body = serde_json::Map::new();
        body.insert("cursor".to_string(), serde_json::json!(7));

        let get = ResponseCache::request_key("GET", "/items", &BTreeMap::new(), &Default::default());
        let post = ResponseCache::request_key("POST", "/items", &BTreeMap::new(), &Default::default());
        let post_body = ResponseCache::request_key("POST", "/items", &BTreeMap::new(), &body);

        assert_ne!(get, post);
        assert_ne!(post, post_body);
    }
}
