//! Forensic sealer: accumulates processed events into Merkle-rooted,
//! prev-linked, Ed25519-signed integrity blocks.
//!
//! Three triggers cut a block: the pending batch reaching the block
//! size, the periodic sealing tick, and graceful shutdown. The chain
//! invariant (block *n*'s `prev` equals block *n-1*'s `root`) is
//! maintained by sealing under one lock, so a size-triggered seal and
//! a tick can never interleave their chain updates.

pub mod keys;
pub mod merkle;

pub use keys::{load_or_generate, SealingKeys};

use crate::error::{Result, SiemError};
use crate::model::{Event, IntegrityBlock};
use crate::pipeline::Processor;
use crate::storage::meta_store::{AuditRecord, EvidenceRecord};
use crate::storage::MetaStore;
use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, Verifier};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "forensics";

struct SealerState {
    pending: Vec<Event>,
    prev_root: [u8; 32],
}

/// Builds the tamper-evident audit chain.
pub struct ForensicSealer {
    store: Arc<MetaStore>,
    state: Mutex<SealerState>,
    block_size: usize,
    keys: Option<SealingKeys>,
}

impl ForensicSealer {
    /// New sealer. The previous root is initialised from the most
    /// recent stored block, or all zeros for a fresh chain. `keys` may
    /// be absent; blocks are then persisted unsigned (and logged).
    pub fn new(
        store: Arc<MetaStore>,
        block_size: usize,
        keys: Option<SealingKeys>,
    ) -> Result<Self> {
        let prev_root = match store.last_block()? {
            Some(block) => {
                let mut root = [0u8; 32];
                if block.root.len() == 32 {
                    root.copy_from_slice(&block.root);
                } else {
                    warn!(
                        block_id = block.id,
                        "stored root is not 32 bytes, restarting chain from genesis"
                    );
                }
                root
            }
            None => [0u8; 32],
        };
        if keys.is_none() {
            warn!("no signing key available, blocks will be sealed unsigned");
        }
        info!(prev_root = %hex::encode(&prev_root[..8]), "forensic sealer initialised");
        Ok(Self {
            store,
            state: Mutex::new(SealerState {
                pending: Vec::new(),
                prev_root,
            }),
            block_size,
            keys,
        })
    }

    /// Hex public key for auditors, when a key pair is loaded.
    pub fn public_key_hex(&self) -> Option<String> {
        self.keys.as_ref().map(|k| k.public_key_hex())
    }

    /// Seal whatever is pending, if anything. Called by the periodic
    /// tick and at shutdown.
    pub fn seal_pending(&self) {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return;
        }
        self.seal_locked(&mut state);
    }

    /// Events currently awaiting a seal.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Cut a block from the pending batch. Runs with the state lock
    /// held: the chain linkage depends on `prev_root` staying put
    /// until the block has landed.
    fn seal_locked(&self, state: &mut SealerState) {
        let events = std::mem::take(&mut state.pending);
        let root = match merkle::merkle_root(&events) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "merkle tree build failed, dropping batch from chain");
                return;
            }
        };
        let timestamp = Utc::now();
        let event_count = events.len() as i64;
        let ts_nanos = timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX);

        let digest = block_digest(&root, &state.prev_root, event_count, ts_nanos);
        let signature = self
            .keys
            .as_ref()
            .map(|k| k.signing.sign(&digest).to_bytes().to_vec());

        let block = IntegrityBlock {
            id: 0,
            root: root.to_vec(),
            prev: state.prev_root.to_vec(),
            event_count,
            timestamp,
            signature,
        };

        match self.store.insert_block(&block) {
            Ok(id) => {
                state.prev_root = root;
                let signed = if block.signature.is_some() {
                    "signed"
                } else {
                    "unsigned"
                };
                info!(
                    block_id = id,
                    events = event_count,
                    root = %hex::encode(&root[..8]),
                    signed,
                    "sealed integrity block"
                );
            }
            Err(e) => {
                // The batch is lost to the chain but the events
                // themselves are already in the raw store.
                warn!(error = %e, "failed to persist integrity block");
            }
        }
    }

    /// Verify a block's signature: recompute the digest and check it
    /// against the stored public key. `Ok(false)` means the block was
    /// sealed unsigned; an invalid signature is an integrity error.
    pub fn verify_block(&self, block: &IntegrityBlock) -> Result<bool> {
        let Some(sig_bytes) = &block.signature else {
            return Ok(false);
        };
        let Some(keys) = &self.keys else {
            return Err(SiemError::integrity(
                COMPONENT,
                "no public key available for verification",
            ));
        };
        let signature = Signature::from_slice(sig_bytes).map_err(|e| {
            SiemError::integrity(COMPONENT, format!("malformed signature: {e}"))
        })?;
        let ts_nanos = block.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let digest = block_digest(&block.root, &block.prev, block.event_count, ts_nanos);
        keys.verifying
            .verify(&digest, &signature)
            .map_err(|_| {
                SiemError::integrity(
                    COMPONENT,
                    format!("signature verification failed for block {}", block.id),
                )
            })?;
        Ok(true)
    }

    /// Walk the stored chain: every block's `prev` must equal its
    /// predecessor's `root`, and every signed block must verify.
    /// Returns the number of blocks checked.
    pub fn verify_chain(&self) -> Result<usize> {
        let blocks = self.store.list_blocks(0)?;
        let mut prev: Option<&IntegrityBlock> = None;
        for block in &blocks {
            if let Some(prev) = prev {
                if block.prev != prev.root {
                    let err = SiemError::integrity(
                        COMPONENT,
                        format!("chain break: block {} prev != block {} root", block.id, prev.id),
                    );
                    self.record_violation(&err);
                    return Err(err);
                }
            }
            if let Err(err) = self.verify_block(block) {
                self.record_violation(&err);
                return Err(err);
            }
            prev = Some(block);
        }
        Ok(blocks.len())
    }

    fn record_violation(&self, err: &SiemError) {
        let audit = AuditRecord {
            id: Uuid::new_v4().to_string(),
            user_id: "system".into(),
            action: "integrity_violation".into(),
            target_type: "integrity_block".into(),
            target_id: String::new(),
            details: err.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.insert_audit(&audit) {
            warn!(error = %e, "could not write integrity violation to audit log");
        }
    }

    /// Hash a raw event into the evidence table and write the matching
    /// audit row. The hash is signed when a key is present.
    pub fn capture_evidence(
        &self,
        case_id: &str,
        event_id: &str,
        user: &str,
        reason: &str,
        raw_event: &str,
    ) -> Result<()> {
        let hash: [u8; 32] = Sha256::digest(raw_event.as_bytes()).into();
        let hash_hex = hex::encode(hash);
        let signature = self
            .keys
            .as_ref()
            .map(|k| hex::encode(k.signing.sign(&hash).to_bytes()))
            .unwrap_or_default();

        self.store.insert_evidence(&EvidenceRecord {
            id: Uuid::new_v4().to_string(),
            case_id: case_id.into(),
            event_id: event_id.into(),
            recorded_by: user.into(),
            reason: reason.into(),
            raw_hash: hash_hex.clone(),
            signature,
            created_at: Utc::now(),
        })?;

        self.store.insert_audit(&AuditRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user.into(),
            action: "evidence_captured".into(),
            target_type: "case".into(),
            target_id: case_id.into(),
            details: format!("Event {event_id} captured. SHA-256: {}…", &hash_hex[..16]),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl Processor for ForensicSealer {
    fn name(&self) -> &'static str {
        "forensics"
    }

    /// Append the finalised event to the pending batch; cut a block
    /// when the batch reaches the configured size.
    async fn process(&self, event: &mut Event) {
        let mut state = self.state.lock();
        state.pending.push(event.clone());
        if state.pending.len() >= self.block_size {
            self.seal_locked(&mut state);
        }
    }
}

/// Signature payload: `SHA-256(root ‖ prev ‖ "{count}:{ts_nanos}")` —
/// covering both the content and the chain linkage.
fn block_digest(root: &[u8], prev: &[u8], event_count: i64, ts_nanos: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(root);
    hasher.update(prev);
    hasher.update(format!("{event_count}:{ts_nanos}").as_bytes());
    hasher.finalize().into()
}

/// Periodic sealing tick; seals pending events on shutdown too.
pub async fn run_sealer_ticker(
    sealer: Arc<ForensicSealer>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("sealer ticker stopping, sealing pending batch");
                sealer.seal_pending();
                return;
            }
            _ = ticker.tick() => sealer.seal_pending(),
        }
    }
}
