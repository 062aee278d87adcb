// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Trap subscriptions, and the reports waiting to be forwarded.

use osmtest::api::Gid;
use osmtest::api::InformInfo;
use osmtest::api::InformInfoRecord;
use osmtest::api::MadStatus;
use osmtest::api::Notice;
use osmtest::api::trap;
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// Subscriptions by subscriber GID and trap number. The QPN a
/// subscription names is not part of its identity.
#[derive(Clone, Debug, Default)]
pub struct Subscriptions {
    subs: BTreeMap<(Gid, u16), InformInfoRecord>,
    next_enum: u16,
    pending: VecDeque<Notice>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Subscribe or unsubscribe, as `info` says. Subscribing again
    /// updates the subscription in place.
    pub fn set(&mut self, info: &InformInfo) -> Result<InformInfo, MadStatus> {
        let key = (info.gid, info.trap_num);

        if !info.subscribe {
            return match self.subs.remove(&key) {
                Some(_) => Ok(*info),
                None => Err(MadStatus::REQ_INVALID),
            };
        }

        match self.subs.get_mut(&key) {
            Some(rec) => rec.inform_info = *info,
            None => {
                let rec = InformInfoRecord {
                    subscriber_gid: info.gid,
                    subscriber_enum: self.next_enum,
                    inform_info: *info,
                };
                self.next_enum = self.next_enum.wrapping_add(1);
                self.subs.insert(key, rec);
            }
        }
        Ok(*info)
    }

    pub fn records(
        &self,
        gid: Option<Gid>,
        subscriber_enum: Option<u16>,
    ) -> Vec<InformInfoRecord> {
        self.subs
            .values()
            .filter(|r| gid.is_none_or(|g| r.subscriber_gid == g))
            .filter(|r| subscriber_enum.is_none_or(|e| r.subscriber_enum == e))
            .copied()
            .collect()
    }

    fn subscribed(&self, gid: Gid, trap_num: u16) -> bool {
        self.subs.contains_key(&(gid, trap_num))
            || self.subs.contains_key(&(gid, trap::ALL))
    }

    /// Queue a notice as if a trap had been raised in the fabric.
    pub fn raise(&mut self, notice: Notice) {
        self.pending.push_back(notice);
    }

    /// The next queued notice `gid` is subscribed to. Notices it does
    /// not want are consumed on the way.
    pub fn next_report(&mut self, gid: Gid) -> Option<Notice> {
        while let Some(n) = self.pending.pop_front() {
            if self.subscribed(gid, n.trap_num) {
                return Some(n);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ME: Gid = Gid::from_parts(0xFE80_0000_0000_0000, 0x11);

    fn info(trap_num: u16, qpn: u32, subscribe: bool) -> InformInfo {
        InformInfo { gid: ME, trap_num, qpn, subscribe, ..Default::default() }
    }

    #[test]
    fn resubscribe_updates() {
        let mut s = Subscriptions::new();
        s.set(&info(trap::ALL, 1, true)).unwrap();
        s.set(&info(trap::ALL, 0, true)).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.records(Some(ME), None)[0].inform_info.qpn, 0);
        assert_eq!(s.records(None, Some(0)).len(), 1);
        assert!(s.records(None, Some(1)).is_empty());
    }

    #[test]
    fn unsubscribe_needs_subscription() {
        let mut s = Subscriptions::new();
        let res = s.set(&info(trap::ALL, 1, false));
        assert_eq!(res, Err(MadStatus::REQ_INVALID));

        s.set(&info(0x1234, 1, true)).unwrap();
        s.set(&info(0x1234, 7, false)).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn reports_follow_subscriptions() {
        let mut s = Subscriptions::new();
        let notice =
            |trap_num| Notice { trap_num, gid: ME, ..Default::default() };
        s.raise(notice(trap::GID_OUT_OF_SERVICE));
        s.raise(notice(trap::GID_IN_SERVICE));
        s.raise(notice(trap::GID_OUT_OF_SERVICE));

        s.set(&info(trap::GID_IN_SERVICE, 1, true)).unwrap();
        let n = s.next_report(ME).unwrap();
        assert_eq!(n.trap_num, trap::GID_IN_SERVICE);

        s.set(&info(trap::ALL, 1, true)).unwrap();
        let n = s.next_report(ME).unwrap();
        assert_eq!(n.trap_num, trap::GID_OUT_OF_SERVICE);
        assert!(s.next_report(ME).is_none());
    }
}
