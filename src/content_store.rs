//! Content-addressed storage for batch payloads.
//!
//! The registry only keeps a batch's CID and integrity root. The IOC list
//! itself lives in an external content store and is fetched back through an
//! ordered list of gateways.

use crate::config::ContentStoreConfig;
use crate::merkle::{hash_leaf, MerkleCommitmentTree};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const PAYLOAD_FORMAT: &str = "cti-ioc-batch";
pub const PAYLOAD_VERSION: &str = "1.0";

/// Prefix of CIDs minted by [`MemoryContentStore`].
const MEMORY_CID_PREFIX: &str = "mem-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    /// Submitter address, or `"anonymous"`.
    pub source: String,
    /// Hex integrity root over `iocs`.
    pub merkle_root: String,
}

/// JSON document stored for each batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub version: String,
    pub format: String,
    pub timestamp: u64,
    pub iocs: Vec<String>,
    pub metadata: PayloadMetadata,
}

impl BatchPayload {
    /// Builds a payload and computes its integrity root.
    pub fn new(iocs: Vec<String>, source: impl Into<String>, timestamp: u64) -> Result<Self> {
        let tree = MerkleCommitmentTree::from_items(iocs.as_slice())?;
        Ok(Self {
            version: PAYLOAD_VERSION.to_string(),
            format: PAYLOAD_FORMAT.to_string(),
            timestamp,
            iocs,
            metadata: PayloadMetadata {
                source: source.into(),
                merkle_root: format!("0x{}", hex::encode(tree.root)),
            },
        })
    }

    pub fn integrity_tree(&self) -> Result<MerkleCommitmentTree> {
        MerkleCommitmentTree::from_items(self.iocs.as_slice())
    }

    /// Recomputes the root over `iocs` and compares it with `expected`.
    pub fn matches_root(&self, expected: &[u8; 32]) -> Result<bool> {
        Ok(&self.integrity_tree()?.root == expected)
    }
}

/// Stores JSON documents and resolves them by content identifier.
pub trait ContentStore: Send + Sync {
    fn put(&self, document: &serde_json::Value) -> Result<String>;

    fn get(&self, cid: &str) -> Result<serde_json::Value>;
}

/// One retrieval endpoint.
pub trait Gateway: Send + Sync {
    fn name(&self) -> String;

    /// Returns the raw response body for `cid`, giving up after `timeout`.
    fn fetch(&self, cid: &str, timeout: Duration) -> Result<String>;
}

/// Resolves a CID through gateways tried in order.
///
/// A gateway counts as failed if it errors, answers after the timeout, or
/// answers with something that does not parse as JSON.
pub struct FallbackFetcher {
    gateways: Vec<Box<dyn Gateway>>,
    timeout: Duration,
}

impl FallbackFetcher {
    pub fn new(gateways: Vec<Box<dyn Gateway>>, timeout: Duration) -> Self {
        Self { gateways, timeout }
    }

    /// Orders `available` by the configured gateway names.
    ///
    /// An empty name list keeps every available gateway in its given order.
    /// Configured names with no matching gateway are skipped.
    pub fn from_config(config: &ContentStoreConfig, available: Vec<Box<dyn Gateway>>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        if config.gateways.is_empty() {
            return Ok(Self::new(available, timeout));
        }

        let mut pool: Vec<Option<Box<dyn Gateway>>> = available.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(config.gateways.len());
        for name in &config.gateways {
            let slot = pool
                .iter_mut()
                .find(|g| g.as_ref().is_some_and(|g| &g.name() == name));
            match slot.and_then(Option::take) {
                Some(gateway) => ordered.push(gateway),
                None => warn!("Configured gateway {name} is not available; skipping"),
            }
        }

        if ordered.is_empty() {
            bail!("None of the {} configured gateways is available", config.gateways.len());
        }
        info!("Content store fetcher uses {} gateways", ordered.len());
        Ok(Self::new(ordered, timeout))
    }

    #[must_use]
    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    pub fn fetch_json(&self, cid: &str) -> Result<serde_json::Value> {
        if self.gateways.is_empty() {
            bail!("No gateways configured to resolve {cid}");
        }

        for gateway in &self.gateways {
            let started = Instant::now();
            let body = match gateway.fetch(cid, self.timeout) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Gateway {} failed for {}: {:#}", gateway.name(), cid, e);
                    continue;
                }
            };

            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                warn!(
                    "Gateway {} answered {} after {:?}, over the {:?} limit",
                    gateway.name(),
                    cid,
                    elapsed,
                    self.timeout
                );
                continue;
            }

            match serde_json::from_str(&body) {
                Ok(value) => {
                    debug!("Resolved {} through {}", cid, gateway.name());
                    return Ok(value);
                }
                Err(e) => warn!("Gateway {} returned non-JSON for {}: {}", gateway.name(), cid, e),
            }
        }

        Err(anyhow!(
            "All {} gateways failed to resolve {}",
            self.gateways.len(),
            cid
        ))
    }

    /// Fetches and decodes a batch payload.
    pub fn fetch_payload(&self, cid: &str) -> Result<BatchPayload> {
        let value = self.fetch_json(cid)?;
        serde_json::from_value(value).with_context(|| format!("Document {cid} is not a batch payload"))
    }
}

/// In-process store with CIDs derived from the document bytes.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// CID the store assigns to `document`.
    pub fn cid_for(document: &serde_json::Value) -> Result<String> {
        let bytes = serde_json::to_vec(document).context("Failed to serialize document")?;
        Ok(format!("{MEMORY_CID_PREFIX}{}", hex::encode(hash_leaf(&bytes))))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().map_or(0, |d| d.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, document: &serde_json::Value) -> Result<String> {
        let cid = Self::cid_for(document)?;
        let body = serde_json::to_string(document).context("Failed to serialize document")?;
        self.documents
            .write()
            .map_err(|_| anyhow!("Content store lock poisoned"))?
            .insert(cid.clone(), body);
        info!("Stored document {cid}");
        Ok(cid)
    }

    fn get(&self, cid: &str) -> Result<serde_json::Value> {
        let documents = self
            .documents
            .read()
            .map_err(|_| anyhow!("Content store lock poisoned"))?;
        let body = documents
            .get(cid)
            .with_context(|| format!("Unknown content identifier {cid}"))?;
        serde_json::from_str(body).with_context(|| format!("Stored document {cid} is not JSON"))
    }
}

impl Gateway for MemoryContentStore {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn fetch(&self, cid: &str, _timeout: Duration) -> Result<String> {
        let documents = self
            .documents
            .read()
            .map_err(|_| anyhow!("Content store lock poisoned"))?;
        documents
            .get(cid)
            .cloned()
            .with_context(|| format!("Unknown content identifier {cid}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedGateway {
        name: &'static str,
        response: Result<String, String>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Gateway for ScriptedGateway {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn fetch(&self, _cid: &str, _timeout: Duration) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.response.clone().map_err(|e| anyhow!(e))
        }
    }

    fn scripted(
        name: &'static str,
        response: Result<&str, &str>,
        delay: Duration,
        calls: &Arc<AtomicUsize>,
    ) -> Box<dyn Gateway> {
        Box::new(ScriptedGateway {
            name,
            response: response.map(str::to_string).map_err(str::to_string),
            delay,
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_falls_back_past_errors_and_bad_json() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = FallbackFetcher::new(
            vec![
                scripted("down", Err("connection refused"), Duration::ZERO, &calls),
                scripted("html", Ok("<html>rate limited</html>"), Duration::ZERO, &calls),
                scripted("good", Ok(r#"{"iocs": ["a"]}"#), Duration::ZERO, &calls),
                scripted("unused", Ok("{}"), Duration::ZERO, &calls),
            ],
            Duration::from_secs(5),
        );

        let value = fetcher.fetch_json("bafy").unwrap();
        assert_eq!(value["iocs"][0], "a");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_slow_gateway_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = FallbackFetcher::new(
            vec![
                scripted("slow", Ok(r#"{"slow": true}"#), Duration::from_millis(50), &calls),
                scripted("fast", Ok(r#"{"slow": false}"#), Duration::ZERO, &calls),
            ],
            Duration::from_millis(10),
        );
        assert_eq!(fetcher.fetch_json("bafy").unwrap()["slow"], false);
    }

    #[test]
    fn test_all_gateways_failing_is_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = FallbackFetcher::new(
            vec![scripted("down", Err("timeout"), Duration::ZERO, &calls)],
            Duration::from_secs(1),
        );
        assert!(fetcher.fetch_json("bafy").is_err());
        assert!(FallbackFetcher::new(Vec::new(), Duration::from_secs(1))
            .fetch_json("bafy")
            .is_err());
    }

    #[test]
    fn test_config_orders_gateways() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = ContentStoreConfig {
            gateways: vec!["second".to_string(), "missing".to_string(), "first".to_string()],
            timeout_secs: 2,
        };
        let fetcher = FallbackFetcher::from_config(
            &config,
            vec![
                scripted("first", Ok(r#"{"from": "first"}"#), Duration::ZERO, &calls),
                scripted("second", Ok(r#"{"from": "second"}"#), Duration::ZERO, &calls),
            ],
        )
        .unwrap();
        assert_eq!(fetcher.gateway_count(), 2);
        assert_eq!(fetcher.fetch_json("bafy").unwrap()["from"], "second");

        let nothing = ContentStoreConfig {
            gateways: vec!["missing".to_string()],
            timeout_secs: 2,
        };
        assert!(FallbackFetcher::from_config(&nothing, Vec::new()).is_err());
    }

    #[test]
    fn test_memory_store_cids_are_content_derived() {
        let store = MemoryContentStore::new();
        let doc = json!({"iocs": ["198.51.100.7"], "format": PAYLOAD_FORMAT});
        let cid = store.put(&doc).unwrap();
        assert_eq!(cid, MemoryContentStore::cid_for(&doc).unwrap());
        assert_eq!(store.put(&doc).unwrap(), cid);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&cid).unwrap(), doc);
        assert!(store.get("mem-missing").is_err());
    }

    #[test]
    fn test_payload_round_trip_through_fetcher() {
        let store = Arc::new(MemoryContentStore::new());
        let payload = BatchPayload::new(
            vec!["evil.example.com".to_string(), "203.0.113.9".to_string()],
            "anonymous",
            1_700_000_000,
        )
        .unwrap();
        let cid = store.put(&serde_json::to_value(&payload).unwrap()).unwrap();

        struct Shared(Arc<MemoryContentStore>);
        impl Gateway for Shared {
            fn name(&self) -> String {
                self.0.name()
            }
            fn fetch(&self, cid: &str, timeout: Duration) -> Result<String> {
                self.0.fetch(cid, timeout)
            }
        }

        let fetcher = FallbackFetcher::new(
            vec![Box::new(Shared(Arc::clone(&store)))],
            Duration::from_secs(1),
        );
        let fetched = fetcher.fetch_payload(&cid).unwrap();
        assert_eq!(fetched, payload);

        let tree = fetched.integrity_tree().unwrap();
        assert!(fetched.matches_root(&tree.root).unwrap());
        assert_eq!(fetched.metadata.merkle_root, format!("0x{}", hex::encode(tree.root)));
        assert!(!fetched.matches_root(&[0u8; 32]).unwrap());
    }
}
