/// One timing probe: local send/receive instants and the remote clock
/// reading the control PC attached to its reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub sent_ns: u64,
    pub received_ns: u64,
    pub remote_ns: i64,
}

impl Probe {
    pub fn round_trip_ns(&self) -> u64 {
        self.received_ns.saturating_sub(self.sent_ns)
    }
}

/// Mapping from local presentation time to control-PC time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffset {
    /// remote minus local, at `measured_at_ns`
    pub offset_ns: i64,
    /// change of `offset_ns` per local nanosecond
    pub drift: f64,
    pub measured_at_ns: u64,
    pub round_trip_ns: u64,
}

impl ClockOffset {
    /// Cristian's estimate: the remote reading was taken half a round trip
    /// before the reply arrived.
    pub fn from_probe(probe: &Probe) -> Self {
        let rtt = probe.round_trip_ns();
        let remote_at_receive = probe.remote_ns + (rtt / 2) as i64;
        Self {
            offset_ns: remote_at_receive - probe.received_ns as i64,
            drift: 0.0,
            measured_at_ns: probe.received_ns,
            round_trip_ns: rtt,
        }
    }

    /// Estimate from the probe with the shortest round trip, whose one-way
    /// delay assumption has the least room to be wrong.
    pub fn best_of(probes: &[Probe]) -> Option<Self> {
        probes
            .iter()
            .min_by_key(|p| p.round_trip_ns())
            .map(Self::from_probe)
    }

    pub fn with_drift_from(mut self, previous: &ClockOffset) -> Self {
        let span = self.measured_at_ns.saturating_sub(previous.measured_at_ns);
        if span > 0 {
            self.drift = (self.offset_ns - previous.offset_ns) as f64 / span as f64;
        }
        self
    }

    pub fn to_remote(&self, local_ns: u64) -> i64 {
        let since = local_ns as i64 - self.measured_at_ns as i64;
        local_ns as i64 + self.offset_ns + (self.drift * since as f64).round() as i64
    }
}
