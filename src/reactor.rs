// SPDX-License-Identifier: MIT

//! §4.4: the Event Reactor. A single dispatch loop that reads kernel
//! events (acquire/expire/migrate/mapping) and hands each one to the
//! [`UpperLayer`] port. The dispatcher never holds the Policy Table's
//! mutex while calling into `UpperLayer` — callbacks are free to call
//! back into this crate (e.g. to install a new policy in response to an
//! acquire) without deadlocking.

use std::net::IpAddr;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::ports::{AcquireEvent, AlgorithmType, Direction, MigrateEvent, UpperLayer};
use crate::selector::{Host, TrafficSelector};

/// A decoded kernel event, independent of the wire format that produced
/// it. The default [`crate::xfrm_io`] backend parses `XFRM_MSG_*`
/// multicast messages into this shape before handing them to
/// [`EventReactor::dispatch`].
#[derive(Clone, Debug)]
pub enum KernelEvent {
    Acquire {
        reqid: u32,
        src_ts: TrafficSelector,
        dst_ts: TrafficSelector,
        label: Option<Vec<u8>>,
        seq: u32,
        cpu: Option<u32>,
    },
    Expire {
        protocol: u8,
        spi: u32,
        dst: Host,
        hard: bool,
    },
    Migrate {
        reqid: u32,
        src_ts: TrafficSelector,
        dst_ts: TrafficSelector,
        dir: Direction,
        local: Host,
        remote: Host,
    },
    Mapping {
        proto: u8,
        spi: u32,
        dst: Host,
        new_src: IpAddr,
        new_src_port: u16,
    },
}

/// Drives a stream of [`KernelEvent`]s to an [`UpperLayer`]. Owns no
/// table state of its own: it is purely a translation and dispatch
/// point between the kernel's event stream and the daemon's upper
/// layer, matching the original's `receive_events` thread which never
/// itself touches the SPD/SAD tables except through the same add/del
/// entry points application code uses.
pub struct EventReactor {
    upper: Arc<dyn UpperLayer>,
}

impl EventReactor {
    pub fn new(upper: Arc<dyn UpperLayer>) -> Self {
        EventReactor { upper }
    }

    /// Consume `events` until the stream ends, dispatching each one.
    /// Intended to be spawned as its own task; a single reactor serves
    /// the whole process, matching the one-thread-per-netlink-group
    /// design of the original.
    pub async fn run(&self, mut events: impl Stream<Item = KernelEvent> + Unpin) {
        while let Some(event) = events.next().await {
            self.dispatch(event);
        }
    }

    pub fn dispatch(&self, event: KernelEvent) {
        match event {
            KernelEvent::Acquire {
                reqid,
                src_ts,
                dst_ts,
                label,
                seq,
                cpu,
            } => self.process_acquire(reqid, src_ts, dst_ts, label, seq, cpu),
            KernelEvent::Expire {
                protocol,
                spi,
                dst,
                hard,
            } => self.process_expire(protocol, spi, dst, hard),
            KernelEvent::Migrate {
                reqid,
                src_ts,
                dst_ts,
                dir,
                local,
                remote,
            } => self.process_migrate(reqid, src_ts, dst_ts, dir, local, remote),
            KernelEvent::Mapping {
                proto,
                spi,
                dst,
                new_src,
                new_src_port,
            } => self.process_mapping(proto, spi, dst, new_src, new_src_port),
        }
    }

    fn process_acquire(
        &self,
        reqid: u32,
        src_ts: TrafficSelector,
        dst_ts: TrafficSelector,
        label: Option<Vec<u8>>,
        seq: u32,
        cpu: Option<u32>,
    ) {
        debug!("XFRM_MSG_ACQUIRE for reqid={reqid} seq={seq}");
        self.upper.on_acquire(
            reqid,
            AcquireEvent {
                src_ts,
                dst_ts,
                label,
                seq,
                cpu,
            },
        );
    }

    fn process_expire(&self, protocol: u8, spi: u32, dst: Host, hard: bool) {
        debug!(
            "XFRM_MSG_EXPIRE proto={protocol} spi={spi:#x} hard={hard}"
        );
        self.upper.on_expire(protocol, spi, dst, hard);
    }

    fn process_migrate(
        &self,
        reqid: u32,
        src_ts: TrafficSelector,
        dst_ts: TrafficSelector,
        dir: Direction,
        local: Host,
        remote: Host,
    ) {
        debug!("XFRM_MSG_MIGRATE for reqid={reqid} dir={dir:?}");
        self.upper.on_migrate(
            reqid,
            MigrateEvent {
                src_ts,
                dst_ts,
                dir,
                local,
                remote,
            },
        );
    }

    fn process_mapping(&self, proto: u8, spi: u32, dst: Host, new_src: IpAddr, new_src_port: u16) {
        debug!("XFRM_MSG_MAPPING proto={proto} spi={spi:#x} new_src={new_src}");
        self.upper
            .on_mapping(proto, spi, dst, Host::new(new_src, new_src_port));
    }

    /// §4.3's fallback path: ask `upper` for an algorithm name not found
    /// in the built-in table, logging the miss either way.
    pub fn resolve_algorithm(&self, ikev2_id: u16, kind: AlgorithmType) -> Option<String> {
        let name = self.upper.lookup_algorithm(ikev2_id, kind);
        if name.is_none() {
            warn!("no kernel algorithm name for {kind:?} id={ikev2_id}");
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUpper {
        acquires: AtomicUsize,
        expires: AtomicUsize,
        migrates: AtomicUsize,
        mappings: AtomicUsize,
        last_mapping_src: Mutex<Option<IpAddr>>,
    }

    impl UpperLayer for RecordingUpper {
        fn on_acquire(&self, _reqid: u32, _event: AcquireEvent) {
            self.acquires.fetch_add(1, Ordering::SeqCst);
        }
        fn on_expire(&self, _protocol: u8, _spi: u32, _dst: Host, _hard: bool) {
            self.expires.fetch_add(1, Ordering::SeqCst);
        }
        fn on_migrate(&self, _reqid: u32, _event: MigrateEvent) {
            self.migrates.fetch_add(1, Ordering::SeqCst);
        }
        fn on_mapping(&self, _proto: u8, _spi: u32, _dst: Host, new_src: Host) {
            self.mappings.fetch_add(1, Ordering::SeqCst);
            *self.last_mapping_src.lock().unwrap() = Some(new_src.addr);
        }
    }

    fn ts() -> TrafficSelector {
        TrafficSelector::from_subnet("10.0.0.0".parse().unwrap(), 24)
    }

    #[tokio::test]
    async fn run_dispatches_every_event_kind_once() {
        let upper = Arc::new(RecordingUpper::default());
        let reactor = EventReactor::new(upper.clone());

        let events = vec![
            KernelEvent::Acquire {
                reqid: 1,
                src_ts: ts(),
                dst_ts: ts(),
                label: None,
                seq: 0,
                cpu: None,
            },
            KernelEvent::Expire {
                protocol: 50,
                spi: 0x1234,
                dst: Host::new("2.2.2.2".parse().unwrap(), 0),
                hard: true,
            },
            KernelEvent::Migrate {
                reqid: 1,
                src_ts: ts(),
                dst_ts: ts(),
                dir: Direction::Out,
                local: Host::new("3.3.3.3".parse().unwrap(), 0),
                remote: Host::new("4.4.4.4".parse().unwrap(), 0),
            },
            KernelEvent::Mapping {
                proto: 50,
                spi: 0x1234,
                dst: Host::new("2.2.2.2".parse().unwrap(), 0),
                new_src: "5.5.5.5".parse().unwrap(),
                new_src_port: 4500,
            },
        ];

        reactor.run(stream::iter(events)).await;

        assert_eq!(upper.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(upper.expires.load(Ordering::SeqCst), 1);
        assert_eq!(upper.migrates.load(Ordering::SeqCst), 1);
        assert_eq!(upper.mappings.load(Ordering::SeqCst), 1);
        assert_eq!(
            *upper.last_mapping_src.lock().unwrap(),
            Some("5.5.5.5".parse().unwrap())
        );
    }

    #[test]
    fn resolve_algorithm_falls_through_to_upper_layer() {
        struct NamedUpper;
        impl UpperLayer for NamedUpper {
            fn on_acquire(&self, _: u32, _: AcquireEvent) {}
            fn on_expire(&self, _: u8, _: u32, _: Host, _: bool) {}
            fn on_migrate(&self, _: u32, _: MigrateEvent) {}
            fn on_mapping(&self, _: u8, _: u32, _: Host, _: Host) {}
            fn lookup_algorithm(&self, ikev2_id: u16, _kind: AlgorithmType) -> Option<String> {
                (ikev2_id == 65010).then(|| "custom-cipher".to_string())
            }
        }

        let reactor = EventReactor::new(Arc::new(NamedUpper));
        assert_eq!(
            reactor.resolve_algorithm(65010, AlgorithmType::Encryption),
            Some("custom-cipher".to_string())
        );
        assert_eq!(
            reactor.resolve_algorithm(9, AlgorithmType::Encryption),
            None
        );
    }
}
