//! NetFlow v5 collector.
//!
//! Listens on its own UDP socket, decodes the 24-byte header plus
//! 48-byte flow records, maintains process-wide traffic counters and a
//! ring of recent flows for top-talker queries, and emits one event
//! per record. Events are injected through the pipeline's standard
//! ingest call, so they traverse the same enrichment → detection chain
//! as every other source.

use crate::enrichment::geoip::is_private_str;
use crate::model::{Event, FieldValue};
use crate::pipeline::IngestionPipeline;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

const HEADER_LEN: usize = 24;
const RECORD_LEN: usize = 48;
const RING_CAPACITY: usize = 1000;

/// One decoded v5 flow record.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    /// Source address
    pub src_ip: String,
    /// Destination address
    pub dst_ip: String,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol number
    pub proto: u8,
    /// Bytes in the flow
    pub bytes: u64,
    /// Packets in the flow
    pub packets: u64,
}

/// Counter snapshot for the dashboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetflowStats {
    /// Flows decoded since startup
    pub total_flows: u64,
    /// Bytes flowing public → private
    pub bytes_in: u64,
    /// Bytes flowing private → public
    pub bytes_out: u64,
    /// Flows currently held in the ring
    pub recent_flows: usize,
    /// Distinct public addresses in the ring
    pub external_ips: usize,
}

/// The collector. Cheap to share; counters are atomics and the ring
/// sits behind one mutex.
pub struct NetflowCollector {
    pipeline: Arc<IngestionPipeline>,
    total_flows: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    recent: Mutex<VecDeque<FlowRecord>>,
}

impl NetflowCollector {
    /// New collector feeding the given pipeline. Flow events enter
    /// through the bounded queue like any listener's, so the
    /// enrichment-before-detection ordering holds for them too.
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            total_flows: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        })
    }

    /// Bind the UDP socket; bind failure is a startup failure.
    pub async fn bind(port: u16) -> std::io::Result<UdpSocket> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, "netflow collector listening");
        Ok(socket)
    }

    /// Receive loop; returns when the shutdown signal fires.
    pub async fn serve(
        self: Arc<Self>,
        socket: UdpSocket,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                res = socket.recv_from(&mut buf) => {
                    match res {
                        Ok((n, peer)) => {
                            self.handle_packet(&buf[..n], &peer.ip().to_string());
                        }
                        Err(e) => warn!(error = %e, "netflow receive failed"),
                    }
                }
            }
        }
    }

    /// Decode one datagram. Non-v5 packets and short buffers are
    /// silently dropped; this port sees garbage constantly.
    pub fn handle_packet(&self, data: &[u8], source_host: &str) {
        if data.len() < HEADER_LEN {
            return;
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != 5 {
            return;
        }
        let count = u16::from_be_bytes([data[2], data[3]]) as usize;

        for i in 0..count {
            let offset = HEADER_LEN + i * RECORD_LEN;
            if offset + RECORD_LEN > data.len() {
                break;
            }
            let record = &data[offset..offset + RECORD_LEN];
            let flow = decode_record(record);
            self.track(&flow);
            self.pipeline.ingest(flow_event(&flow, source_host));
        }
    }

    fn track(&self, flow: &FlowRecord) {
        self.total_flows.fetch_add(1, Ordering::Relaxed);
        let src_private = is_private_str(&flow.src_ip);
        let dst_private = is_private_str(&flow.dst_ip);
        if src_private && !dst_private {
            self.bytes_out.fetch_add(flow.bytes, Ordering::Relaxed);
        } else if !src_private && dst_private {
            self.bytes_in.fetch_add(flow.bytes, Ordering::Relaxed);
        }

        let mut recent = self.recent.lock();
        if recent.len() == RING_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(flow.clone());
    }

    /// Counter snapshot.
    pub fn stats(&self) -> NetflowStats {
        let recent = self.recent.lock();
        let mut external = std::collections::HashSet::new();
        for f in recent.iter() {
            if !is_private_str(&f.src_ip) {
                external.insert(f.src_ip.as_str());
            }
            if !is_private_str(&f.dst_ip) {
                external.insert(f.dst_ip.as_str());
            }
        }
        NetflowStats {
            total_flows: self.total_flows.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            recent_flows: recent.len(),
            external_ips: external.len(),
        }
    }

    /// The top flows by aggregated byte volume over the recent ring,
    /// grouped by (src, dst) pair.
    pub fn top_talkers(&self, limit: usize) -> Vec<FlowRecord> {
        let recent = self.recent.lock();
        let mut agg: HashMap<(String, String), FlowRecord> = HashMap::new();
        for f in recent.iter() {
            agg.entry((f.src_ip.clone(), f.dst_ip.clone()))
                .and_modify(|e| {
                    e.bytes += f.bytes;
                    e.packets += f.packets;
                })
                .or_insert_with(|| f.clone());
        }
        drop(recent);

        let mut flows: Vec<FlowRecord> = agg.into_values().collect();
        flows.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        flows.truncate(limit);
        flows
    }
}

fn decode_record(record: &[u8]) -> FlowRecord {
    let ip = |o: usize| {
        Ipv4Addr::new(record[o], record[o + 1], record[o + 2], record[o + 3]).to_string()
    };
    FlowRecord {
        src_ip: ip(0),
        dst_ip: ip(4),
        src_port: u16::from_be_bytes([record[32], record[33]]),
        dst_port: u16::from_be_bytes([record[34], record[35]]),
        proto: record[38],
        bytes: u32::from_be_bytes([record[20], record[21], record[22], record[23]]) as u64,
        packets: u32::from_be_bytes([record[16], record[17], record[18], record[19]]) as u64,
    }
}

fn flow_event(flow: &FlowRecord, source_host: &str) -> Event {
    let outbound = is_private_str(&flow.src_ip) && !is_private_str(&flow.dst_ip);
    let mut ev = Event::new(
        "netflow",
        source_host,
        format!(
            "Flow: {}:{} -> {}:{} (Proto: {})",
            flow.src_ip, flow.src_port, flow.dst_ip, flow.dst_port, flow.proto
        ),
    );
    ev.category = "network".into();
    ev.fields
        .insert("src_ip".into(), FieldValue::Str(flow.src_ip.clone()));
    ev.fields
        .insert("dst_ip".into(), FieldValue::Str(flow.dst_ip.clone()));
    ev.fields.insert("src_port".into(), flow.src_port.into());
    ev.fields.insert("dst_port".into(), flow.dst_port.into());
    ev.fields
        .insert("proto".into(), FieldValue::Int(i64::from(flow.proto)));
    ev.fields
        .insert("bytes".into(), FieldValue::Int(flow.bytes as i64));
    ev.fields
        .insert("packets".into(), FieldValue::Int(flow.packets as i64));
    ev.fields.insert(
        "direction".into(),
        FieldValue::Str(if outbound { "outbound" } else { "inbound" }.into()),
    );
    ev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SearchQuery, StorageEngine};
    use std::time::Duration;

    /// Build a v5 packet with the given records.
    fn packet(records: &[(Ipv4Addr, Ipv4Addr, u16, u16, u8, u32, u32)]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + records.len() * RECORD_LEN];
        buf[0..2].copy_from_slice(&5u16.to_be_bytes());
        buf[2..4].copy_from_slice(&(records.len() as u16).to_be_bytes());
        for (i, (src, dst, sport, dport, proto, packets, bytes)) in records.iter().enumerate() {
            let o = HEADER_LEN + i * RECORD_LEN;
            buf[o..o + 4].copy_from_slice(&src.octets());
            buf[o + 4..o + 8].copy_from_slice(&dst.octets());
            buf[o + 16..o + 20].copy_from_slice(&packets.to_be_bytes());
            buf[o + 20..o + 24].copy_from_slice(&bytes.to_be_bytes());
            buf[o + 32..o + 34].copy_from_slice(&sport.to_be_bytes());
            buf[o + 34..o + 36].copy_from_slice(&dport.to_be_bytes());
            buf[o + 38] = *proto;
        }
        buf
    }

    fn collector() -> (Arc<NetflowCollector>, Arc<StorageEngine>, Arc<IngestionPipeline>) {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let pipeline = IngestionPipeline::start(
            256,
            50,
            Duration::from_millis(20),
            storage.clone(),
            vec![],
        );
        (NetflowCollector::new(pipeline.clone()), storage, pipeline)
    }

    #[tokio::test]
    async fn v5_records_become_events_with_counters() {
        let (collector, storage, pipeline) = collector();
        let pkt = packet(&[
            (
                Ipv4Addr::new(10, 0, 0, 5),
                Ipv4Addr::new(93, 184, 216, 34),
                51234,
                443,
                6,
                10,
                4_000,
            ),
            (
                Ipv4Addr::new(93, 184, 216, 34),
                Ipv4Addr::new(10, 0, 0, 5),
                443,
                51234,
                6,
                8,
                90_000,
            ),
        ]);
        collector.handle_packet(&pkt, "10.0.0.1");

        let stats = collector.stats();
        assert_eq!(stats.total_flows, 2);
        assert_eq!(stats.bytes_out, 4_000);
        assert_eq!(stats.bytes_in, 90_000);
        assert_eq!(stats.external_ips, 1);

        pipeline.stop().await;
        let stored = storage.search(&SearchQuery::default()).unwrap();
        assert_eq!(stored.len(), 2);
        let outbound = stored
            .iter()
            .find(|e| e.fields["direction"] == FieldValue::Str("outbound".into()))
            .unwrap();
        assert_eq!(outbound.fields["src_ip"], FieldValue::Str("10.0.0.5".into()));
        assert_eq!(outbound.fields["dst_port"], FieldValue::Int(443));
        assert!(outbound.message.starts_with("Flow: 10.0.0.5:51234 ->"));
    }

    #[tokio::test]
    async fn non_v5_and_truncated_packets_are_dropped() {
        let (collector, _storage, pipeline) = collector();

        let mut v9 = packet(&[(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(8, 8, 8, 8),
            1,
            2,
            17,
            1,
            1,
        )]);
        v9[0..2].copy_from_slice(&9u16.to_be_bytes());
        collector.handle_packet(&v9, "10.0.0.1");
        collector.handle_packet(&[0u8; 10], "10.0.0.1");

        // header claims two records but only one is present
        let mut short = packet(&[(
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(8, 8, 8, 8),
            1,
            2,
            17,
            1,
            500,
        )]);
        short[2..4].copy_from_slice(&2u16.to_be_bytes());
        collector.handle_packet(&short, "10.0.0.1");

        assert_eq!(collector.stats().total_flows, 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn ring_is_bounded_and_top_talkers_aggregate() {
        let (collector, _storage, pipeline) = collector();
        for i in 0..1100u32 {
            let pkt = packet(&[(
                Ipv4Addr::new(10, 0, (i % 3) as u8, 1),
                Ipv4Addr::new(203, 0, 113, 9),
                1000,
                443,
                6,
                1,
                100 + i,
            )]);
            collector.handle_packet(&pkt, "10.0.0.1");
        }
        let stats = collector.stats();
        assert_eq!(stats.total_flows, 1100);
        assert_eq!(stats.recent_flows, RING_CAPACITY);

        let talkers = collector.top_talkers(2);
        assert_eq!(talkers.len(), 2);
        assert!(talkers[0].bytes >= talkers[1].bytes);
        pipeline.stop().await;
    }
}
