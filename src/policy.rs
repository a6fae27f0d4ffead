// SPDX-License-Identifier: MIT

//! §4.2/§5: the Policy Table. Owns the shared mutex `M` and condition
//! variable `C` that also guard the [`crate::sa::SaTable`] (§4.1:
//! "Concurrency: all operations run under the Policy Table's single
//! mutex"), and implements the add/delete algorithms, auto-priority
//! formula, and `working`/`waiting` serialization protocol (I3-I7).
//!
//! The single shared condvar is modeled with [`tokio::sync::Notify`]:
//! `notify_waiters()` broadcasts to every task currently parked in
//! `notified().await`, each of which re-checks its own entry's
//! `working` flag on wake — exactly the "threads wake and re-check"
//! discipline §9 calls out, adapted from `threading::condvar_t` to this
//! crate's async kernel I/O port.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::error::{IpsecError, Result};
use crate::ports::{
    Direction, KernelAck, KernelIpsecIo, PolicyId, PolicyParams, PolicyPriority, PolicyType,
    RouteSpec, RoutingPort,
};
use crate::sa::{SaHandle, SaTable};
use crate::selector::{port_mask_bits, ts2selector, Selector};
use crate::settings::Settings;

/// Identity tuple for a [`PolicyEntry`]: `(selector, mark, if_id,
/// direction, label)` per §3.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PolicyKey {
    selector: Selector,
    mark: u32,
    if_id: u32,
    direction: Direction,
    label: Option<Vec<u8>>,
}

fn policy_key(id: &PolicyId) -> PolicyKey {
    let ifindex = 0; // resolved by the caller-provided interface name lookup, if any
    let selector = ts2selector(&id.src_ts, &id.dst_ts, ifindex);
    PolicyKey {
        selector,
        mark: id.mark_value,
        if_id: id.if_id,
        direction: id.dir,
        label: id.label.clone(),
    }
}

/// A priority-sorted binding of an installed policy to one SA (§3).
#[derive(Clone, Debug)]
pub struct PolicySa {
    pub priority: u32,
    pub auto_priority: u32,
    pub ptype: PolicyType,
    pub pcpu_acquires: bool,
    pub sa: SaHandle,
    pub reqid: u32,
    pub peer_src_ts: Option<crate::selector::TrafficSelector>,
    pub peer_dst_ts: Option<crate::selector::TrafficSelector>,
}

/// §4.2's installed-policy table entry.
pub struct PolicyEntry {
    direction: Direction,
    selector: Selector,
    mark: u32,
    if_id: u32,
    label: Option<Vec<u8>>,
    reqid: u32,
    used_by: Vec<PolicySa>,
    route: Option<RouteSpec>,
    waiting: u32,
    working: bool,
    last_used: Option<u64>,
}

impl PolicyEntry {
    fn new(key: &PolicyKey) -> Self {
        PolicyEntry {
            direction: key.direction,
            selector: key.selector,
            mark: key.mark,
            if_id: key.if_id,
            label: key.label.clone(),
            reqid: 0,
            used_by: Vec::new(),
            route: None,
            waiting: 0,
            working: false,
            last_used: None,
        }
    }

    pub fn used_by(&self) -> &[PolicySa] {
        &self.used_by
    }

    pub fn route(&self) -> Option<&RouteSpec> {
        self.route.as_ref()
    }

    pub fn reqid(&self) -> u32 {
        self.reqid
    }
}

/// §4.2 auto-priority formula, grounded verbatim on `get_priority()` in
/// `kernel_netlink_ipsec.c`.
fn auto_priority(selector: &Selector, prio: PolicyPriority, bound_to_interface: bool) -> u32 {
    const BASE: u32 = 200_000;
    let mut priority = BASE;
    priority += match prio {
        PolicyPriority::Fallback => 2 * BASE,
        PolicyPriority::Routed | PolicyPriority::Default => BASE,
        PolicyPriority::Pass => 0,
    };

    let sport_bits = port_mask_bits(selector.sport_mask);
    let dport_bits = port_mask_bits(selector.dport_mask);

    priority -= (selector.prefixlen_s as u32 + selector.prefixlen_d as u32) * 512;
    priority -= if selector.proto != 0 { 256 } else { 0 };
    priority -= (sport_bits + dport_bits) * 4;
    priority -= if bound_to_interface { 2 } else { 0 };
    priority -= if prio != PolicyPriority::Routed { 1 } else { 0 };
    priority
}

/// Ordering used to keep `used_by` sorted per I3: descending effective
/// priority, ties broken by descending auto-priority, then preferring a
/// nonzero reqid.
fn policy_sa_rank(sa: &PolicySa) -> (std::cmp::Reverse<u32>, std::cmp::Reverse<u32>, bool) {
    (
        std::cmp::Reverse(sa.priority),
        std::cmp::Reverse(sa.auto_priority),
        sa.reqid == 0, // false (nonzero reqid) sorts before true
    )
}

fn insert_sorted(used_by: &mut Vec<PolicySa>, sa: PolicySa) -> usize {
    let rank = policy_sa_rank(&sa);
    let pos = used_by
        .iter()
        .position(|existing| policy_sa_rank(existing) > rank)
        .unwrap_or(used_by.len());
    used_by.insert(pos, sa);
    pos
}

struct TableInner {
    policies: HashMap<PolicyKey, PolicyEntry>,
    sa_table: SaTable,
}

/// The authoritative map of installed policies (§4.2), serializing
/// mutations per-entry while allowing parallelism across entries.
pub struct PolicyTable {
    inner: Mutex<TableInner>,
    condvar: Notify,
    kernel: Arc<dyn KernelIpsecIo>,
    routing: Arc<dyn RoutingPort>,
    settings: Arc<dyn Settings>,
}

/// Outcome of [`PolicyTable::add_policy`] / [`PolicyTable::del_policy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    Installed,
    Updated,
    RefcountOnly,
    Removed,
    NotFound,
}

impl PolicyTable {
    pub fn new(
        kernel: Arc<dyn KernelIpsecIo>,
        routing: Arc<dyn RoutingPort>,
        settings: Arc<dyn Settings>,
    ) -> Self {
        PolicyTable {
            inner: Mutex::new(TableInner {
                policies: HashMap::new(),
                sa_table: SaTable::new(),
            }),
            condvar: Notify::new(),
            kernel,
            routing,
            settings,
        }
    }

    /// Claim `working` on the entry for `key`, inserting it if absent.
    /// Blocks (yielding the mutex between attempts) while another task
    /// holds `working` for the same entry — I4.
    async fn claim_working(&self, key: &PolicyKey) {
        loop {
            let mut guard = self.inner.lock().await;
            let entry = guard
                .policies
                .entry(key.clone())
                .or_insert_with(|| PolicyEntry::new(key));
            if !entry.working {
                entry.working = true;
                return;
            }
            entry.waiting += 1;
            let notified = self.condvar.notified();
            drop(guard);
            notified.await;
            let mut guard = self.inner.lock().await;
            if let Some(entry) = guard.policies.get_mut(key) {
                entry.waiting = entry.waiting.saturating_sub(1);
            }
        }
    }

    /// Release `working` and, per §9, broadcast while still holding `M`
    /// if anyone is waiting.
    async fn release_working(&self, key: &PolicyKey, remove_if_empty: bool) {
        let mut guard = self.inner.lock().await;
        let should_remove = if let Some(entry) = guard.policies.get_mut(key) {
            entry.working = false;
            remove_if_empty && entry.used_by.is_empty() && entry.waiting == 0
        } else {
            false
        };
        let waiting = guard
            .policies
            .get(key)
            .map(|e| e.waiting > 0)
            .unwrap_or(false);
        if should_remove {
            guard.policies.remove(key);
        }
        if waiting {
            self.condvar.notify_waiters();
        }
    }

    /// §4.2 add algorithm.
    pub async fn add_policy(&self, id: PolicyId, params: PolicyParams) -> Result<PolicyOutcome> {
        let key = policy_key(&id);
        self.claim_working(&key).await;

        let result = self.add_policy_locked(&key, &id, params).await;

        self.release_working(&key, false).await;
        result
    }

    async fn add_policy_locked(
        &self,
        key: &PolicyKey,
        id: &PolicyId,
        mut params: PolicyParams,
    ) -> Result<PolicyOutcome> {
        let bound_to_interface = id.interface.is_some();
        let auto_prio = auto_priority(&key.selector, params.priority_hint, bound_to_interface);
        let effective_priority = params.priority_override.unwrap_or(auto_prio);
        params.effective_priority = effective_priority;

        let (sa_handle, reqid, was_head, total) = {
            let mut guard = self.inner.lock().await;
            let reqid = params.sa.cfg.reqid;
            let handle = guard.sa_table.intern(params.sa.clone());
            let entry = guard
                .policies
                .get_mut(key)
                .expect("entry claimed by claim_working");
            let sa = PolicySa {
                priority: effective_priority,
                auto_priority: auto_prio,
                ptype: params.ptype,
                pcpu_acquires: params.pcpu_acquires,
                sa: handle,
                reqid,
                peer_src_ts: params.peer_src_ts.clone(),
                peer_dst_ts: params.peer_dst_ts.clone(),
            };
            let pos = insert_sorted(&mut entry.used_by, sa);
            let was_head = pos == 0;
            if was_head {
                entry.reqid = reqid;
            }
            (handle, reqid, was_head, entry.used_by.len())
        };

        if !was_head {
            debug!("policy binding added below head for {:?} reqid={reqid}, no kernel update needed", id.dir);
            return Ok(if total > 1 {
                PolicyOutcome::RefcountOnly
            } else {
                PolicyOutcome::Installed
            });
        }

        let update = self.settings.policy_update_always() || total > 1;
        let subject = format!("{:?} policy reqid={}", id.dir, reqid);

        let outcome = self
            .install_head(id, &params, update, &subject)
            .await?;

        if id.dir == Direction::Out && self.settings.install_routes() {
            if let (Some(src_ts), Some(dst_ts)) = (&params.peer_src_ts, &params.peer_dst_ts) {
                if let Err(e) = self
                    .maybe_install_route(id, &sa_handle, &params, src_ts, dst_ts, key)
                    .await
                {
                    warn!("route install failed, policy still installed: {e}");
                }
            }
        }

        Ok(outcome)
    }

    async fn install_head(
        &self,
        id: &PolicyId,
        params: &PolicyParams,
        update: bool,
        subject: &str,
    ) -> Result<PolicyOutcome> {
        let attempt = if update {
            self.kernel.update_policy(id, params).await
        } else {
            self.kernel.add_policy(id, params).await
        };

        match attempt {
            Ok(()) => Ok(if update {
                PolicyOutcome::Updated
            } else {
                PolicyOutcome::Installed
            }),
            Err(IpsecError::AlreadyExists { .. }) if !update => {
                info!("{subject}: NEWPOLICY already exists, retrying as UPDATE");
                self.kernel.update_policy(id, params).await?;
                Ok(PolicyOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    /// §4.5 step 11: decide whether this outbound policy needs a route,
    /// and if the computed route differs from the cached one (I7),
    /// uninstall the old one and install the new one.
    async fn maybe_install_route(
        &self,
        id: &PolicyId,
        head_sa: &SaHandle,
        params: &PolicyParams,
        src_ts: &crate::selector::TrafficSelector,
        dst_ts: &crate::selector::TrafficSelector,
        key: &PolicyKey,
    ) -> Result<()> {
        let (local, remote, cached_route) = {
            let guard = self.inner.lock().await;
            let sa = guard
                .sa_table
                .get(*head_sa)
                .expect("head SA still referenced while installing its route");
            let cached = guard.policies.get(key).and_then(|e| e.route.clone());
            (sa.src, sa.dst, cached)
        };

        let route_mgr = crate::route::RouteManager::new(self.routing.as_ref(), self.settings.as_ref());
        let transport_mode = params.sa.cfg.mode() == crate::sa::SaMode::Transport;
        let decision = route_mgr.decide(
            id.dir,
            params.ptype,
            transport_mode,
            id.if_id,
            &local,
            &remote,
            src_ts,
            dst_ts,
        );

        let new_route = match decision {
            crate::route::RouteDecision::Skip(reason) => {
                debug!("route skipped for {:?} policy: {reason:?}", id.dir);
                None
            }
            crate::route::RouteDecision::Install(spec) => Some(spec),
        };

        if new_route == cached_route {
            return Ok(());
        }

        if let Some(old) = &cached_route {
            if let Err(e) = route_mgr.uninstall(old) {
                warn!("failed to uninstall previous route: {e}");
            }
        }

        let installed = match &new_route {
            Some(spec) => match route_mgr.install(spec) {
                Ok(_) => Some(spec.clone()),
                Err(e) => {
                    warn!("route install failed for {:?} policy: {e}", id.dir);
                    None
                }
            },
            None => None,
        };

        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.policies.get_mut(key) {
            entry.route = installed;
        }
        Ok(())
    }

    /// §4.2 delete algorithm.
    pub async fn del_policy(
        &self,
        id: PolicyId,
        matched_sa: SaHandle,
        matched_priority: u32,
        matched_auto_priority: u32,
        matched_ptype: PolicyType,
        matched_pcpu: bool,
    ) -> Result<PolicyOutcome> {
        let key = policy_key(&id);

        {
            let guard = self.inner.lock().await;
            if !guard.policies.contains_key(&key) {
                return Ok(PolicyOutcome::NotFound);
            }
        }

        self.claim_working(&key).await;
        let result = self
            .del_policy_locked(
                &key,
                &id,
                matched_sa,
                matched_priority,
                matched_auto_priority,
                matched_ptype,
                matched_pcpu,
            )
            .await;

        let remove = matches!(result, Ok(PolicyOutcome::Removed) | Ok(PolicyOutcome::NotFound));
        self.release_working(&key, remove).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn del_policy_locked(
        &self,
        key: &PolicyKey,
        id: &PolicyId,
        matched_sa: SaHandle,
        matched_priority: u32,
        matched_auto_priority: u32,
        matched_ptype: PolicyType,
        matched_pcpu: bool,
    ) -> Result<PolicyOutcome> {
        let (head_removed, remaining, new_head) = {
            let mut guard = self.inner.lock().await;
            let entry = match guard.policies.get_mut(key) {
                Some(e) => e,
                None => return Ok(PolicyOutcome::NotFound),
            };
            let pos = entry.used_by.iter().position(|sa| {
                sa.priority == matched_priority
                    && sa.auto_priority == matched_auto_priority
                    && sa.ptype == matched_ptype
                    && sa.pcpu_acquires == matched_pcpu
                    && sa.sa == matched_sa
            });
            let pos = match pos {
                Some(p) => p,
                None => return Ok(PolicyOutcome::NotFound),
            };
            let removed_sa = entry.used_by.remove(pos);
            guard.sa_table.release(removed_sa.sa);
            let entry = guard.policies.get_mut(key).unwrap();
            let remaining = entry.used_by.len();
            let new_head = entry.used_by.first().cloned();
            if let Some(head) = &new_head {
                entry.reqid = head.reqid;
            }
            (pos == 0, remaining, new_head)
        };

        if remaining == 0 {
            let subject = format!("{:?} policy", id.dir);
            match self.kernel.del_policy(id).await {
                Ok(KernelAck::NotFound) => {
                    warn!("{subject}: kernel had no record of policy being deleted");
                }
                Ok(_) => {}
                Err(e) => return Err(e),
            }
            return Ok(PolicyOutcome::Removed);
        }

        if head_removed {
            // The deleted binding was the head; the kernel policy must be
            // re-sent with the new head's attributes (§4.2 Delete
            // algorithm), otherwise the kernel keeps directing traffic at
            // the SA binding that was just removed.
            let head = new_head.expect("remaining > 0 implies a new head exists");
            let params = {
                let guard = self.inner.lock().await;
                let sa = guard
                    .sa_table
                    .get(head.sa)
                    .expect("new head SA still referenced");
                PolicyParams {
                    sa: crate::sa::IpsecSaParams {
                        src: sa.src,
                        dst: sa.dst,
                        mark: sa.mark,
                        if_id: sa.if_id,
                        hw_offload: sa.hw_offload,
                        cfg: sa.cfg.clone(),
                    },
                    priority_hint: PolicyPriority::Default,
                    priority_override: Some(head.priority),
                    effective_priority: head.priority,
                    ptype: head.ptype,
                    pcpu_acquires: head.pcpu_acquires,
                    peer_src_ts: head.peer_src_ts.clone(),
                    peer_dst_ts: head.peer_dst_ts.clone(),
                }
            };

            let subject = format!("{:?} policy reqid={}", id.dir, head.reqid);
            match self.kernel.update_policy(id, &params).await {
                Ok(()) => {}
                Err(IpsecError::NotFound { .. }) => {
                    info!("{subject}: UPDPOLICY found no kernel record, retrying as NEW");
                    self.kernel.add_policy(id, &params).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(PolicyOutcome::RefcountOnly)
    }

    /// §4.2: the use-time recorded by the last successful kernel
    /// `GETPOLICY` read, or 0 if the policy isn't tracked or was never
    /// used. Issues the kernel query (without holding `M`, per §5) and
    /// caches the result on the entry for callers that only want the
    /// cached value later.
    pub async fn query_policy(&self, id: &PolicyId) -> Result<u64> {
        let key = policy_key(id);
        {
            let guard = self.inner.lock().await;
            if !guard.policies.contains_key(&key) {
                return Ok(0);
            }
        }

        let last_used = self.kernel.query_policy(id).await?.unwrap_or(0);

        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.policies.get_mut(&key) {
            entry.last_used = Some(last_used);
        }
        Ok(last_used)
    }

    pub async fn flush_policies(&self) -> Result<()> {
        self.kernel.flush_policies().await?;
        let mut guard = self.inner.lock().await;
        guard.policies.clear();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn entry_snapshot(
        &self,
        id: &PolicyId,
    ) -> Option<(usize, u32)> {
        let key = policy_key(id);
        let guard = self.inner.lock().await;
        guard
            .policies
            .get(&key)
            .map(|e| (e.used_by.len(), e.reqid))
    }
}

impl Selector {
    fn is_wildcard(&self) -> bool {
        self.prefixlen_s == 0 && self.prefixlen_d == 0 && self.proto == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PolicyId, PolicyParams, PolicyPriority, PolicyType, RouteStatus};
    use crate::sa::{HwOffload, IpsecSaParams, SaConfig};
    use crate::selector::{Host, Mark, TrafficSelector};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeKernel {
        add_calls: AtomicU32,
        update_calls: AtomicU32,
    }

    impl KernelIpsecIo for FakeKernel {
        fn add_sa<'a>(
            &'a self,
            _id: crate::ports::SaId,
            _params: &'a crate::ports::SaParams,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn update_sa<'a>(
            &'a self,
            _id: crate::ports::SaId,
            _params: &'a crate::ports::SaParams,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn del_sa(&self, _id: crate::ports::SaId) -> BoxFuture<'_, Result<KernelAck>> {
            Box::pin(async { Ok(KernelAck::Success) })
        }
        fn query_sa(
            &self,
            _id: crate::ports::SaId,
        ) -> BoxFuture<'_, Result<crate::ports::SaUsage>> {
            Box::pin(async { Ok(Default::default()) })
        }
        fn flush_sas(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn add_policy<'a>(
            &'a self,
            _id: &'a PolicyId,
            _head: &'a PolicyParams,
        ) -> BoxFuture<'a, Result<()>> {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn update_policy<'a>(
            &'a self,
            _id: &'a PolicyId,
            _head: &'a PolicyParams,
        ) -> BoxFuture<'a, Result<()>> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn del_policy<'a>(&'a self, _id: &'a PolicyId) -> BoxFuture<'a, Result<KernelAck>> {
            Box::pin(async { Ok(KernelAck::Success) })
        }
        fn query_policy<'a>(
            &'a self,
            _id: &'a PolicyId,
        ) -> BoxFuture<'a, Result<Option<u64>>> {
            Box::pin(async { Ok(None) })
        }
        fn flush_policies(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn get_spi(
            &self,
            _src: Host,
            _dst: Host,
            _proto: u8,
        ) -> BoxFuture<'_, Result<u32>> {
            Box::pin(async { Ok(0) })
        }
        fn get_cpi(&self, _src: Host, _dst: Host) -> BoxFuture<'_, Result<u16>> {
            Box::pin(async { Ok(0) })
        }
        fn bypass_socket(&self, _fd: i32, _family: i32) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(true) })
        }
        fn enable_udp_decap(
            &self,
            _fd: i32,
            _family: i32,
            _port: u16,
        ) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async { Ok(true) })
        }
        fn set_hash_threshold(
            &self,
            _ipv4: crate::settings::HashThreshold,
            _ipv6: crate::settings::HashThreshold,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn get_hash_threshold(
            &self,
        ) -> BoxFuture<'_, Result<(crate::settings::HashThreshold, crate::settings::HashThreshold)>>
        {
            Box::pin(async {
                Ok((
                    crate::settings::HashThreshold { lbits: 32, rbits: 32 },
                    crate::settings::HashThreshold { lbits: 128, rbits: 128 },
                ))
            })
        }
    }

    struct FakeRouting;
    impl RoutingPort for FakeRouting {
        fn get_interface(&self, _host: &Host) -> Option<String> {
            None
        }
        fn get_nexthop(&self, _dst: &Host, _prefixlen: i32, _src: &Host) -> Option<Host> {
            None
        }
        fn get_address_by_ts(&self, _ts: &TrafficSelector) -> Option<Host> {
            None
        }
        fn add_route(&self, _route: &RouteSpec) -> Result<RouteStatus> {
            Ok(RouteStatus::Success)
        }
        fn del_route(&self, _route: &RouteSpec) -> Result<RouteStatus> {
            Ok(RouteStatus::Success)
        }
    }

    fn policy_id(reqid: u32) -> (PolicyId, PolicyParams) {
        let src_ts = TrafficSelector::from_subnet("10.0.0.0".parse().unwrap(), 24);
        let dst_ts = TrafficSelector::from_subnet("192.168.1.0".parse().unwrap(), 24);
        let id = PolicyId {
            src_ts: src_ts.clone(),
            dst_ts: dst_ts.clone(),
            dir: Direction::Out,
            mark_value: 0,
            mark_mask: 0,
            if_id: 0,
            label: None,
            interface: None,
        };
        let sa_params = IpsecSaParams {
            src: Host::new("1.1.1.1".parse().unwrap(), 0),
            dst: Host::new("2.2.2.2".parse().unwrap(), 0),
            mark: Mark::NONE,
            if_id: 0,
            hw_offload: HwOffload::None,
            cfg: SaConfig {
                reqid,
                ..Default::default()
            },
        };
        let params = PolicyParams {
            sa: sa_params,
            priority_hint: PolicyPriority::Default,
            priority_override: None,
            effective_priority: 0,
            ptype: PolicyType::Ipsec,
            pcpu_acquires: false,
            peer_src_ts: Some(src_ts),
            peer_dst_ts: Some(dst_ts),
        };
        (id, params)
    }

    #[tokio::test]
    async fn s1_auto_priority_matches_spec_example() {
        let selector = ts2selector(
            &TrafficSelector::from_subnet("10.0.0.0".parse().unwrap(), 24),
            &TrafficSelector::from_subnet("192.168.1.0".parse().unwrap(), 24),
            0,
        );
        let prio = auto_priority(&selector, PolicyPriority::Default, false);
        assert_eq!(prio, 375_423);
    }

    #[tokio::test]
    async fn s2_second_add_with_nonzero_reqid_becomes_head() {
        let kernel = Arc::new(FakeKernel {
            add_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
        });
        let table = PolicyTable::new(kernel.clone(), Arc::new(FakeRouting), Arc::new(crate::settings::StaticSettings::default()));

        let (id1, params1) = policy_id(0);
        table.add_policy(id1.clone(), params1).await.unwrap();

        let (id2, params2) = policy_id(2);
        table.add_policy(id2.clone(), params2).await.unwrap();

        let (len, reqid) = table.entry_snapshot(&id1).await.unwrap();
        assert_eq!(len, 2);
        assert_eq!(reqid, 2);
    }

    #[tokio::test]
    async fn add_policy_idempotence_matches_single_cycle() {
        let kernel = Arc::new(FakeKernel {
            add_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
        });
        let settings = Arc::new(crate::settings::StaticSettings::default());
        let table = PolicyTable::new(kernel, Arc::new(FakeRouting), settings);

        let (id, params) = policy_id(1);
        table.add_policy(id.clone(), params.clone()).await.unwrap();
        let snap_after_one = table.entry_snapshot(&id).await;
        assert_eq!(snap_after_one.unwrap().0, 1);

        table.add_policy(id.clone(), params).await.unwrap();
        let snap_after_two = table.entry_snapshot(&id).await;
        assert_eq!(snap_after_two.unwrap().0, 2);
    }
}
