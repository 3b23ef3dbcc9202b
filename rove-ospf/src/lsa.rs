//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use rove_utils::bytes::BytesMutExt;
use serde::{Deserialize, Serialize};

use crate::error::LsaValidationError;
use crate::lsdb::{LSA_MAX_AGE, LSA_MAX_AGE_DIFF, LSA_RESERVED_SEQ_NO};

// LSA type.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// LSA type code.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-5
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, FromPrimitive, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
    OpaqueLink = 9,
    OpaqueArea = 10,
    OpaqueAs = 11,
}

//
// LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// LSA key. It serves both as a global LSA identifier and as a key to store
// LSAs in an LSDB.
//
// The identity rule is type-dependent: router and network LSAs are keyed on
// the advertising router alone, summary and external LSAs on (advertising
// router, link-state ID), and opaque LSAs on (advertising router, opaque
// type, opaque ID), where the opaque type is the first octet of the
// link-state ID and the opaque ID its remaining 24 bits.
//
// Please be aware that modifying the order of the fields will impact
// operations such as iterating over LSDBs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    // LSA type.
    pub lsa_type: LsaType,
    // Type-dependent identity.
    pub ident: LsaIdent,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaIdent {
    AdvRtr(Ipv4Addr),
    AdvRtrLsaId(Ipv4Addr, Ipv4Addr),
    AdvRtrOpaque(Ipv4Addr, u8, u32),
}

// LSA body.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
    OpaqueLink(LsaOpaque),
    OpaqueArea(LsaOpaque),
    OpaqueAs(LsaOpaque),
}

// Router-LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

// Router Properties Registry.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-11
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    TransitNetwork = 2,
    StubNetwork = 3,
    VirtualLink = 4,
}

// Network-LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: Vec<Ipv4Addr>,
}

// Summary-LSA (types 3 and 4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

// AS-External-LSA.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub flags: LsaAsExternalFlags,
    pub mask: Ipv4Addr,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// Opaque LSA (types 9, 10 and 11). The payload is carried verbatim; this
// engine never interprets it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaOpaque {
    pub data: Bytes,
}

// LSA, the unit of information stored and aged by the LSDB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    // LSA header.
    pub hdr: LsaHdr,
    // LSA body.
    pub body: LsaBody,
}

// ===== impl LsaType =====

impl LsaType {
    pub fn code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    pub fn is_opaque(&self) -> bool {
        matches!(
            self.code(),
            Some(
                LsaTypeCode::OpaqueLink
                    | LsaTypeCode::OpaqueArea
                    | LsaTypeCode::OpaqueAs
            )
        )
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

impl From<LsaType> for u16 {
    fn from(lsa_type: LsaType) -> u16 {
        lsa_type.0 as u16
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub(crate) fn new(
        age: u16,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> LsaHdr {
        LsaHdr {
            age,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        }
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::from_hdr(self)
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        // Options octet (unused by this engine).
        buf.put_u8(0);
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }
}

// ===== impl LsaKey =====

impl LsaKey {
    pub fn from_hdr(hdr: &LsaHdr) -> LsaKey {
        let ident = match hdr.lsa_type.code() {
            Some(LsaTypeCode::Router | LsaTypeCode::Network) => {
                LsaIdent::AdvRtr(hdr.adv_rtr)
            }
            Some(
                LsaTypeCode::OpaqueLink
                | LsaTypeCode::OpaqueArea
                | LsaTypeCode::OpaqueAs,
            ) => {
                let octets = hdr.lsa_id.octets();
                let opaque_type = octets[0];
                let opaque_id = u32::from_be_bytes([
                    0, octets[1], octets[2], octets[3],
                ]);
                LsaIdent::AdvRtrOpaque(hdr.adv_rtr, opaque_type, opaque_id)
            }
            // Summary, ASBR-summary, external, and unrecognized types.
            _ => LsaIdent::AdvRtrLsaId(hdr.adv_rtr, hdr.lsa_id),
        };

        LsaKey {
            lsa_type: hdr.lsa_type,
            ident,
        }
    }

    pub fn adv_rtr(&self) -> Ipv4Addr {
        match self.ident {
            LsaIdent::AdvRtr(adv_rtr)
            | LsaIdent::AdvRtrLsaId(adv_rtr, _)
            | LsaIdent::AdvRtrOpaque(adv_rtr, _, _) => adv_rtr,
        }
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        let code = match self {
            LsaBody::Router(_) => LsaTypeCode::Router,
            LsaBody::Network(_) => LsaTypeCode::Network,
            LsaBody::SummaryNetwork(_) => LsaTypeCode::SummaryNetwork,
            LsaBody::SummaryRouter(_) => LsaTypeCode::SummaryRouter,
            LsaBody::AsExternal(_) => LsaTypeCode::AsExternal,
            LsaBody::OpaqueLink(_) => LsaTypeCode::OpaqueLink,
            LsaBody::OpaqueArea(_) => LsaTypeCode::OpaqueArea,
            LsaBody::OpaqueAs(_) => LsaTypeCode::OpaqueAs,
        };
        code.into()
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(router) => {
                buf.put_u8(router.flags.bits());
                buf.put_u8(0);
                buf.put_u16(router.links.len() as u16);
                for link in &router.links {
                    buf.put_ipv4(&link.link_id);
                    buf.put_ipv4(&link.link_data);
                    buf.put_u8(link.link_type as u8);
                    buf.put_u8(0);
                    buf.put_u16(link.metric);
                }
            }
            LsaBody::Network(network) => {
                buf.put_ipv4(&network.mask);
                for adv_rtr in &network.attached_rtrs {
                    buf.put_ipv4(adv_rtr);
                }
            }
            LsaBody::SummaryNetwork(summary)
            | LsaBody::SummaryRouter(summary) => {
                buf.put_ipv4(&summary.mask);
                buf.put_u8(0);
                buf.put_u24(summary.metric);
            }
            LsaBody::AsExternal(external) => {
                buf.put_ipv4(&external.mask);
                buf.put_u8(external.flags.bits());
                buf.put_u24(external.metric);
                buf.put_ipv4(
                    &external.fwd_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                );
                buf.put_u32(external.tag);
            }
            LsaBody::OpaqueLink(opaque)
            | LsaBody::OpaqueArea(opaque)
            | LsaBody::OpaqueAs(opaque) => {
                buf.put_slice(&opaque.data);
            }
        }
    }

    fn validate(&self) -> Result<(), LsaValidationError> {
        match self {
            LsaBody::Router(router) => {
                if router.links.is_empty() {
                    return Err(LsaValidationError::EmptyRouterLinks);
                }
            }
            LsaBody::Network(network) => {
                if network.attached_rtrs.is_empty() {
                    return Err(LsaValidationError::EmptyAttachedRouters);
                }
            }
            _ => (),
        }

        Ok(())
    }
}

// ===== impl Lsa =====

impl Lsa {
    pub fn new(
        age: u16,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Lsa {
        let hdr = LsaHdr::new(age, body.lsa_type(), lsa_id, adv_rtr, seq_no);
        let mut lsa = Lsa { hdr, body };
        lsa.encode_cksum();
        lsa
    }

    pub fn key(&self) -> LsaKey {
        self.hdr.key()
    }

    // Sets the LSA age.
    pub(crate) fn set_age(&mut self, age: u16) {
        self.hdr.age = age;
    }

    // Sets the LSA age to MaxAge.
    pub(crate) fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Encodes the LSA in its canonical big-endian form and updates the
    // header's length and checksum fields.
    fn encode_cksum(&mut self) {
        self.hdr.cksum = 0;
        let mut buf = self.raw();

        // Rewrite LSA length.
        let lsa_len = buf.len() as u16;
        buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
        self.hdr.length = lsa_len;

        // Compute LSA checksum, skipping the Age field.
        let cksum = Self::checksum(&buf[2..(lsa_len as usize)]);
        self.hdr.cksum = u16::from_be_bytes(cksum);
    }

    fn raw(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128);
        self.hdr.encode(&mut buf);
        self.body.encode(&mut buf);
        buf
    }

    pub fn validate(&self) -> Result<(), LsaValidationError> {
        // Validate LSA header.
        if self.hdr.age > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if self.hdr.lsa_type != self.body.lsa_type() {
            return Err(LsaValidationError::LsaTypeMismatch);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }

        // Validate LSA body.
        self.body.validate()?;

        Ok(())
    }

    fn checksum(data: &[u8]) -> [u8; 2] {
        let checksum = fletcher::calc_fletcher16(data);
        let mut checkbyte0 = (checksum & 0x00FF) as i32;
        let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

        // Adjust checksum value using scaling factor.
        let sop = data.len() as u16 - 15;
        let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
        if x <= 0 {
            x += 255;
        }
        checkbyte1 = 510 - checkbyte0 - x;
        if checkbyte1 > 255 {
            checkbyte1 -= 255;
        }
        checkbyte0 = x;
        [checkbyte0 as u8, checkbyte1 as u8]
    }

    // Checks if the checksum is valid.
    fn is_checksum_valid(&self) -> bool {
        let buf = self.raw();
        let lsa_len = self.hdr.length as usize;
        if lsa_len < LsaHdr::LENGTH as usize || lsa_len > buf.len() {
            return false;
        }

        // Skip the Age field.
        fletcher::calc_fletcher16(&buf[2..lsa_len]) == 0
    }
}

// ===== global functions =====

// Compares which LSA instance is more recent.
//
// The tie-break rules: a strictly higher sequence number wins; equal
// sequence numbers compare checksums (higher wins); an instance at MaxAge
// orders below any instance not at MaxAge, and two MaxAge instances tie.
// Instances on the same side of the MaxAge boundary whose ages differ by
// more than MaxAgeDiff compare by age (younger is more recent).
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Less;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Greater;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::lsdb::LSA_MAX_AGE;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn router_lsa(adv_rtr: &str, seq_no: u32) -> Lsa {
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::default(),
            links: vec![LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                addr("10.0.1.0"),
                addr("255.255.255.0"),
                10,
            )],
        });
        Lsa::new(0, addr(adv_rtr), addr(adv_rtr), seq_no, body)
    }

    fn hdr(age: u16, seq_no: u32, cksum: u16) -> LsaHdr {
        LsaHdr {
            age,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: addr("1.1.1.1"),
            adv_rtr: addr("1.1.1.1"),
            seq_no,
            cksum,
            length: 36,
        }
    }

    #[test]
    fn key_router_network() {
        // Router and network LSAs are keyed on the advertising router alone.
        for code in [LsaTypeCode::Router, LsaTypeCode::Network] {
            let hdr = LsaHdr::new(
                0,
                code.into(),
                addr("10.0.0.1"),
                addr("2.2.2.2"),
                1,
            );
            let key = hdr.key();
            assert_eq!(key.lsa_type, LsaType::from(code));
            assert_eq!(key.ident, LsaIdent::AdvRtr(addr("2.2.2.2")));
        }
    }

    #[test]
    fn key_summary_external() {
        for code in [
            LsaTypeCode::SummaryNetwork,
            LsaTypeCode::SummaryRouter,
            LsaTypeCode::AsExternal,
        ] {
            let hdr = LsaHdr::new(
                0,
                code.into(),
                addr("10.0.0.0"),
                addr("2.2.2.2"),
                1,
            );
            assert_eq!(
                hdr.key().ident,
                LsaIdent::AdvRtrLsaId(addr("2.2.2.2"), addr("10.0.0.0"))
            );
        }
    }

    #[test]
    fn key_opaque_split() {
        // The opaque type is the first octet of the link-state ID and the
        // opaque ID its remaining 24 bits.
        let hdr = LsaHdr::new(
            0,
            LsaTypeCode::OpaqueArea.into(),
            addr("1.0.1.44"),
            addr("3.3.3.3"),
            1,
        );
        assert_eq!(
            hdr.key().ident,
            LsaIdent::AdvRtrOpaque(addr("3.3.3.3"), 1, 0x0000012c)
        );
    }

    #[test]
    fn compare_seq_no_wins() {
        assert_eq!(
            lsa_compare(&hdr(0, 5, 100), &hdr(0, 4, 200)),
            Ordering::Greater
        );
        // Sequence numbers compare as signed values: the initial sequence
        // number (0x80000001) is older than any positive one.
        assert_eq!(
            lsa_compare(&hdr(0, 0x80000001, 0), &hdr(0, 1, 0)),
            Ordering::Less
        );
    }

    #[test]
    fn compare_cksum_tiebreak() {
        assert_eq!(
            lsa_compare(&hdr(0, 5, 200), &hdr(0, 5, 100)),
            Ordering::Greater
        );
    }

    #[test]
    fn compare_maxage_inferior() {
        let maxage = hdr(LSA_MAX_AGE, 5, 100);
        let live = hdr(10, 5, 100);
        assert_eq!(lsa_compare(&maxage, &live), Ordering::Less);
        assert_eq!(lsa_compare(&live, &maxage), Ordering::Greater);
        assert_eq!(lsa_compare(&maxage, &maxage), Ordering::Equal);
    }

    #[test]
    fn compare_is_transitive() {
        let a = hdr(0, 6, 0);
        let b = hdr(LSA_MAX_AGE, 5, 100);
        let c = hdr(10, 5, 100);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &c), Ordering::Less);
        assert_eq!(lsa_compare(&a, &c), Ordering::Greater);
    }

    #[test]
    fn checksum_roundtrip() {
        let lsa = router_lsa("1.1.1.1", 1);
        assert_ne!(lsa.hdr.cksum, 0);
        assert!(lsa.validate().is_ok());
    }

    #[test]
    fn checksum_detects_corruption() {
        let mut lsa = router_lsa("1.1.1.1", 1);
        lsa.hdr.cksum = lsa.hdr.cksum.wrapping_add(1);
        assert_eq!(
            lsa.validate(),
            Err(crate::error::LsaValidationError::InvalidChecksum)
        );
    }

    #[test]
    fn validate_rejects_reserved_seq_no() {
        let lsa = router_lsa("1.1.1.1", crate::lsdb::LSA_RESERVED_SEQ_NO);
        assert_eq!(
            lsa.validate(),
            Err(crate::error::LsaValidationError::InvalidLsaSeqNo)
        );
    }

    #[test]
    fn validate_rejects_type_mismatch() {
        let mut lsa = router_lsa("1.1.1.1", 1);
        lsa.hdr.lsa_type = LsaTypeCode::Network.into();
        assert_eq!(
            lsa.validate(),
            Err(crate::error::LsaValidationError::LsaTypeMismatch)
        );
    }
}

