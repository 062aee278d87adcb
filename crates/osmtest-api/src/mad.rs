// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! MAD status words and SA methods.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The methods of the Subnet Administration class that the engine
/// issues.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Method {
    Get,
    GetTable,
    Set,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "SubnAdmGet",
            Self::GetTable => "SubnAdmGetTable",
            Self::Set => "SubnAdmSet",
            Self::Delete => "SubnAdmDelete",
        };
        write!(f, "{s}")
    }
}

/// The 16-bit status word of a MAD response.
///
/// The low two bits are flags (busy, redirect), bits 2-4 hold a code
/// common to all management classes, and bits 8-14 hold a code
/// specific to the SA class. The named constants below are the codes
/// as they appear in the full word.
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct MadStatus(u16);

impl MadStatus {
    pub const SUCCESS: Self = Self(0x0000);
    pub const BUSY: Self = Self(0x0001);
    pub const REDIRECT: Self = Self(0x0002);
    pub const UNSUP_CLASS_VER: Self = Self(0x0004);
    pub const UNSUP_METHOD: Self = Self(0x0008);
    pub const UNSUP_METHOD_ATTR: Self = Self(0x000C);
    pub const INVALID_FIELD: Self = Self(0x001C);

    /// The SA has no resources left to complete the request.
    pub const NO_RESOURCES: Self = Self(0x0100);
    /// The request was malformed or asked for something illegal.
    pub const REQ_INVALID: Self = Self(0x0200);
    /// No record matched the request.
    pub const NO_RECORDS: Self = Self(0x0300);
    /// A Get matched more than one record.
    pub const TOO_MANY_RECORDS: Self = Self(0x0400);
    pub const INVALID_GID: Self = Self(0x0500);
    /// The component mask omitted a field the request requires.
    pub const INSUF_COMPS: Self = Self(0x0600);
    pub const DENIED: Self = Self(0x0700);
    pub const PRIO_SUGGESTED: Self = Self(0x0800);

    const FLAG_MASK: u16 = 0x0003;
    const COMMON_MASK: u16 = 0x001C;
    const CLASS_MASK: u16 = 0x7F00;

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_busy(self) -> bool {
        self.0 & Self::BUSY.0 != 0
    }

    pub const fn is_redirect(self) -> bool {
        self.0 & Self::REDIRECT.0 != 0
    }

    /// The status with the busy and redirect flags stripped.
    pub const fn code(self) -> Self {
        Self(self.0 & !Self::FLAG_MASK)
    }

    /// Return true if this status carries `code`, ignoring flags.
    pub const fn is(self, code: Self) -> bool {
        self.code().0 == code.code().0
    }

    /// The names of every flag and code present, in the order flags,
    /// common code, class code.
    pub fn names(self) -> Vec<String> {
        let mut names = Vec::new();

        if self.is_busy() {
            names.push("BUSY".into());
        }

        if self.is_redirect() {
            names.push("REDIRECT".into());
        }

        match self.0 & Self::COMMON_MASK {
            0 => (),
            0x0004 => names.push("UNSUP_CLASS_VER".into()),
            0x0008 => names.push("UNSUP_METHOD".into()),
            0x000C => names.push("UNSUP_METHOD_ATTR".into()),
            0x001C => names.push("INVALID_FIELD".into()),
            other => names.push(format!("UNKNOWN_COMMON(0x{other:X})")),
        }

        match self.0 & Self::CLASS_MASK {
            0 => (),
            0x0100 => names.push("NO_RESOURCES".into()),
            0x0200 => names.push("REQ_INVALID".into()),
            0x0300 => names.push("NO_RECORDS".into()),
            0x0400 => names.push("TOO_MANY_RECORDS".into()),
            0x0500 => names.push("INVALID_GID".into()),
            0x0600 => names.push("INSUF_COMPS".into()),
            0x0700 => names.push("DENIED".into()),
            0x0800 => names.push("PRIO_SUGGESTED".into()),
            other => names.push(format!("UNKNOWN_SA(0x{other:X})")),
        }

        names
    }
}

impl From<u16> for MadStatus {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl Display for MadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return write!(f, "SUCCESS");
        }

        write!(f, "{}", self.names().join(" | "))
    }
}

impl Debug for MadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MadStatus(0x{:04X}: {self})", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn status_strings() {
        assert_eq!(MadStatus::SUCCESS.to_string(), "SUCCESS");
        assert_eq!(MadStatus::INSUF_COMPS.to_string(), "INSUF_COMPS");

        let s = MadStatus::from_raw(0x0201);
        assert_eq!(s.to_string(), "BUSY | REQ_INVALID");
        assert!(s.is(MadStatus::REQ_INVALID));
        assert!(!s.is(MadStatus::NO_RECORDS));

        let s = MadStatus::from_raw(0x0F1C);
        assert_eq!(s.to_string(), "INVALID_FIELD | UNKNOWN_SA(0xF00)");
    }
}
