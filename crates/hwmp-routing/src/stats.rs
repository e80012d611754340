//! Protocol and per-interface counters

use std::fmt;

/// Per-interface message and byte counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MacStats {
    pub tx_preq: u64,
    pub rx_preq: u64,
    pub tx_prep: u64,
    pub rx_prep: u64,
    pub tx_perr: u64,
    pub rx_perr: u64,
    pub tx_mgt: u64,
    pub tx_mgt_bytes: u64,
    pub rx_mgt: u64,
    pub rx_mgt_bytes: u64,
    pub tx_data: u64,
    pub tx_data_bytes: u64,
    pub rx_data: u64,
    pub rx_data_bytes: u64,
    /// Control elements discarded on receipt with TTL already zero
    pub rx_ttl_expired: u64,
}

impl MacStats {
    pub fn reset(&mut self) {
        *self = MacStats::default();
    }
}

impl fmt::Display for MacStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  txPreq=\"{}\" rxPreq=\"{}\"", self.tx_preq, self.rx_preq)?;
        writeln!(f, "  txPrep=\"{}\" rxPrep=\"{}\"", self.tx_prep, self.rx_prep)?;
        writeln!(f, "  txPerr=\"{}\" rxPerr=\"{}\"", self.tx_perr, self.rx_perr)?;
        writeln!(
            f,
            "  txMgt=\"{}\" txMgtBytes=\"{}\" rxMgt=\"{}\" rxMgtBytes=\"{}\"",
            self.tx_mgt, self.tx_mgt_bytes, self.rx_mgt, self.rx_mgt_bytes
        )?;
        writeln!(
            f,
            "  txData=\"{}\" txDataBytes=\"{}\" rxData=\"{}\" rxDataBytes=\"{}\"",
            self.tx_data, self.tx_data_bytes, self.rx_data, self.rx_data_bytes
        )?;
        write!(f, "  rxTtlExpired=\"{}\"", self.rx_ttl_expired)
    }
}

/// Path selection engine counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProtocolStats {
    pub preq_initiated: u64,
    pub preq_forwarded: u64,
    pub prep_initiated: u64,
    pub prep_forwarded: u64,
    pub perr_initiated: u64,
    pub perr_forwarded: u64,
    pub duplicate_preq: u64,
    /// Control information older than what the table holds
    pub stale: u64,
    pub ttl_dropped: u64,
    pub no_route: u64,
    pub paths_expired: u64,
    pub data_initiated: u64,
    pub data_forwarded: u64,
    pub data_delivered: u64,
    pub data_dropped: u64,
    pub broadcast_duplicates: u64,
}

impl ProtocolStats {
    pub fn reset(&mut self) {
        *self = ProtocolStats::default();
    }

    /// Add the counters of another engine, for network-wide totals
    pub fn accumulate(&mut self, other: &ProtocolStats) {
        self.preq_initiated += other.preq_initiated;
        self.preq_forwarded += other.preq_forwarded;
        self.prep_initiated += other.prep_initiated;
        self.prep_forwarded += other.prep_forwarded;
        self.perr_initiated += other.perr_initiated;
        self.perr_forwarded += other.perr_forwarded;
        self.duplicate_preq += other.duplicate_preq;
        self.stale += other.stale;
        self.ttl_dropped += other.ttl_dropped;
        self.no_route += other.no_route;
        self.paths_expired += other.paths_expired;
        self.data_initiated += other.data_initiated;
        self.data_forwarded += other.data_forwarded;
        self.data_delivered += other.data_delivered;
        self.data_dropped += other.data_dropped;
        self.broadcast_duplicates += other.broadcast_duplicates;
    }
}

impl fmt::Display for ProtocolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  preqInitiated=\"{}\" preqForwarded=\"{}\" prepInitiated=\"{}\" prepForwarded=\"{}\"",
            self.preq_initiated, self.preq_forwarded, self.prep_initiated, self.prep_forwarded
        )?;
        writeln!(
            f,
            "  perrInitiated=\"{}\" perrForwarded=\"{}\" duplicatePreq=\"{}\" stale=\"{}\"",
            self.perr_initiated, self.perr_forwarded, self.duplicate_preq, self.stale
        )?;
        writeln!(
            f,
            "  ttlDropped=\"{}\" noRoute=\"{}\" pathsExpired=\"{}\"",
            self.ttl_dropped, self.no_route, self.paths_expired
        )?;
        write!(
            f,
            "  dataInitiated=\"{}\" dataForwarded=\"{}\" dataDelivered=\"{}\" dataDropped=\"{}\" broadcastDuplicates=\"{}\"",
            self.data_initiated,
            self.data_forwarded,
            self.data_delivered,
            self.data_dropped,
            self.broadcast_duplicates
        )
    }
}
