//! Object Identifier (OID) type.
//!
//! OIDs are stored as `SmallVec<[u32; 16]>` so registry boundaries and
//! transform identifiers rarely touch the heap.

use crate::error::{DecodeErrorKind, Error, OidErrorKind, Result};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// Maximum number of arcs (subidentifiers) allowed in an OID.
///
/// Per RFC 2578 Section 3.5: "there are at most 128 sub-identifiers in a value".
pub const MAX_OID_LEN: usize = 128;

/// Object Identifier.
///
/// Ordering is lexicographic over arcs, so a prefix sorts before every OID
/// beneath it. Registry ranges rely on this: `[root, root.successor())`
/// covers exactly the subtree rooted at `root`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// Create an empty OID.
    pub fn empty() -> Self {
        Self {
            arcs: SmallVec::new(),
        }
    }

    /// Create an OID from arc values.
    ///
    /// ```
    /// use snmp_agent_core::oid::Oid;
    ///
    /// let oid = Oid::new([1, 3, 6, 1]);
    /// assert_eq!(oid.len(), 4);
    /// ```
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Create an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse dotted notation. A single leading dot is accepted, as written
    /// by persisted configuration (`.1.3.6.1`).
    ///
    /// Arc constraints are not checked; registry OIDs such as `[0]` or `[2]`
    /// are legal here. Use [`validate`](Self::validate) for X.690 rules.
    ///
    /// ```
    /// use snmp_agent_core::oid::Oid;
    ///
    /// let a = Oid::parse("1.3.6.1.2.1.1.1.0").unwrap();
    /// let b = Oid::parse(".1.3.6.1.2.1.1.1.0").unwrap();
    /// assert_eq!(a, b);
    /// assert!(Oid::parse("1.3.x").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let body = s.strip_prefix('.').unwrap_or(s);
        if body.is_empty() {
            return Ok(Self::empty());
        }

        let mut arcs = SmallVec::new();
        for part in body.split('.') {
            let arc: u32 = part.parse().map_err(|_| {
                Error::InvalidOid(format!("{s}: {}", OidErrorKind::InvalidArc).into()).boxed()
            })?;
            arcs.push(arc);
        }

        let oid = Self { arcs };
        oid.validate_length()?;
        Ok(oid)
    }

    /// Get the arc values.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Get the number of arcs.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Check if the OID is empty.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Check if this OID starts with another OID.
    pub fn starts_with(&self, other: &Oid) -> bool {
        self.arcs.len() >= other.arcs.len() && self.arcs[..other.arcs.len()] == other.arcs[..]
    }

    /// Arcs after the first `n`, or an empty slice if `n` is past the end.
    pub fn suffix(&self, n: usize) -> &[u32] {
        self.arcs.get(n..).unwrap_or(&[])
    }

    /// Get the parent OID (all arcs except the last).
    pub fn parent(&self) -> Option<Oid> {
        let (_, head) = self.arcs.split_last()?;
        Some(Oid::from_slice(head))
    }

    /// Create a child OID by appending an arc.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Oid { arcs }
    }

    /// The first OID after this whole subtree: the last arc plus one.
    ///
    /// Returns `None` for an empty OID or when the last arc is `u32::MAX`.
    ///
    /// ```
    /// use snmp_agent_core::oid;
    ///
    /// let system = oid!(1, 3, 6, 1, 2, 1, 1);
    /// assert_eq!(system.successor().unwrap(), oid!(1, 3, 6, 1, 2, 1, 2));
    /// ```
    pub fn successor(&self) -> Option<Oid> {
        let mut arcs = self.arcs.clone();
        let last = arcs.last_mut()?;
        *last = last.checked_add(1)?;
        Some(Oid { arcs })
    }

    /// Copy of this OID with the arc at `index` replaced.
    pub fn with_arc(&self, index: usize, value: u32) -> Option<Oid> {
        let mut arcs = self.arcs.clone();
        *arcs.get_mut(index)? = value;
        Some(Oid { arcs })
    }

    /// Validate OID arcs per X.690 Section 8.19.4.
    ///
    /// - arc1 must be 0, 1, or 2
    /// - arc2 must be <= 39 when arc1 is 0 or 1
    pub fn validate(&self) -> Result<()> {
        let Some(&arc1) = self.arcs.first() else {
            return Ok(());
        };

        if arc1 > 2 {
            return Err(
                Error::InvalidOid(OidErrorKind::InvalidFirstArc(arc1).to_string().into()).boxed(),
            );
        }

        if let Some(&arc2) = self.arcs.get(1)
            && arc1 < 2
            && arc2 >= 40
        {
            return Err(Error::InvalidOid(
                OidErrorKind::InvalidSecondArc {
                    first: arc1,
                    second: arc2,
                }
                .to_string()
                .into(),
            )
            .boxed());
        }

        Ok(())
    }

    /// Validate that the OID doesn't exceed [`MAX_OID_LEN`].
    pub fn validate_length(&self) -> Result<()> {
        if self.arcs.len() > MAX_OID_LEN {
            return Err(Error::InvalidOid(
                OidErrorKind::TooManyArcs {
                    count: self.arcs.len(),
                    max: MAX_OID_LEN,
                }
                .to_string()
                .into(),
            )
            .boxed());
        }
        Ok(())
    }

    /// Encode the OID content octets (X.690 Section 8.19).
    ///
    /// The first two arcs combine into one subidentifier `arc1 * 40 + arc2`.
    /// A lone arc encodes as `arc1 * 40`.
    pub fn to_ber_smallvec(&self) -> SmallVec<[u8; 64]> {
        let mut bytes = SmallVec::new();

        match self.arcs.as_slice() {
            [] => {}
            [a] => encode_subidentifier(&mut bytes, a.saturating_mul(40)),
            [a, b, rest @ ..] => {
                encode_subidentifier(&mut bytes, a.saturating_mul(40).saturating_add(*b));
                for &arc in rest {
                    encode_subidentifier(&mut bytes, arc);
                }
            }
        }

        bytes
    }

    /// Encode to BER content octets.
    pub fn to_ber(&self) -> Vec<u8> {
        self.to_ber_smallvec().to_vec()
    }

    /// Decode from BER content octets, enforcing [`MAX_OID_LEN`].
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::empty());
        }

        let mut arcs = SmallVec::new();
        let (first_subid, mut i) = decode_subidentifier(data, 0)?;
        match first_subid {
            0..40 => arcs.extend([0, first_subid]),
            40..80 => arcs.extend([1, first_subid - 40]),
            _ => arcs.extend([2, first_subid - 80]),
        }

        while i < data.len() {
            let (arc, next) = decode_subidentifier(data, i)?;
            arcs.push(arc);
            i = next;

            if arcs.len() > MAX_OID_LEN {
                return Err(Error::decode(
                    i,
                    DecodeErrorKind::OidTooLong {
                        count: arcs.len(),
                        max: MAX_OID_LEN,
                    },
                ));
            }
        }

        Ok(Self { arcs })
    }

    /// Dotted form with a leading dot, or `NULL` when empty.
    ///
    /// This is the form persisted user records use for transform and
    /// clone-from OIDs.
    pub fn to_config_string(&self) -> String {
        if self.arcs.is_empty() {
            return "NULL".to_string();
        }
        let mut s = String::with_capacity(self.arcs.len() * 3);
        for arc in &self.arcs {
            s.push('.');
            s.push_str(&arc.to_string());
        }
        s
    }

    /// Inverse of [`to_config_string`](Self::to_config_string).
    pub fn from_config_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("NULL") {
            return Ok(Self::empty());
        }
        Self::parse(s)
    }
}

fn encode_subidentifier(bytes: &mut SmallVec<[u8; 64]>, value: u32) {
    let groups = (32 - value.leading_zeros()).div_ceil(7).max(1);
    for i in (0..groups).rev() {
        let mut byte = ((value >> (i * 7)) & 0x7F) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        bytes.push(byte);
    }
}

/// Decode one subidentifier starting at `start`, returning (value, next offset).
fn decode_subidentifier(data: &[u8], start: usize) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    let mut i = start;

    loop {
        let Some(&byte) = data.get(i) else {
            return Err(Error::decode(i, DecodeErrorKind::TruncatedData));
        };
        i += 1;

        if value > (u32::MAX >> 7) {
            return Err(Error::decode(i, DecodeErrorKind::IntegerOverflow));
        }
        value = (value << 7) | u32::from(byte & 0x7F);

        if byte & 0x80 == 0 {
            return Ok((value, i));
        }
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.arcs.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = Box<Error>;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::new(arcs)
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.arcs.cmp(&other.arcs)
    }
}

/// Create an OID from literal arcs.
///
/// ```
/// use snmp_agent_core::oid;
///
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}
