//! Identifier definitions.

use std::fmt;
use std::str::FromStr;

use crate::IdError;

// =============================================================================
// VM id
// =============================================================================

/// Cluster-unique numeric id of a virtual machine.
///
/// Allocated by the cluster (`GET /cluster/nextid`) and consumed once when
/// the VM is created. The harness never releases or recycles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmId(u32);

impl VmId {
    /// Smallest id Proxmox hands out for guests.
    pub const MIN: u32 = 100;

    /// Largest id Proxmox accepts.
    pub const MAX: u32 = 999_999_999;

    /// Creates a VM id, validating the range.
    pub fn new(value: u32) -> Result<Self, IdError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(IdError::OutOfRange {
                value: u64::from(value),
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Parses a VM id from its decimal representation.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let value: u64 = s
            .parse()
            .map_err(|_| IdError::NotNumeric(s.to_string()))?;

        let value = u32::try_from(value).map_err(|_| IdError::OutOfRange {
            value,
            min: Self::MIN,
            max: Self::MAX,
        })?;

        Self::new(value)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<u32> for VmId {
    type Error = IdError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VmId> for u32 {
    fn from(id: VmId) -> Self {
        id.0
    }
}

impl serde::Serialize for VmId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

/// Proxmox returns VM ids as JSON numbers in most places but as strings
/// from `/cluster/nextid`; both are accepted.
impl<'de> serde::Deserialize<'de> for VmId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct VmIdVisitor;

        impl serde::de::Visitor<'_> for VmIdVisitor {
            type Value = VmId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a VM id as integer or decimal string")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<VmId, E> {
                let value = u32::try_from(v).map_err(|_| {
                    E::custom(IdError::OutOfRange {
                        value: v,
                        min: VmId::MIN,
                        max: VmId::MAX,
                    })
                })?;
                VmId::new(value).map_err(E::custom)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<VmId, E> {
                let v =
                    u64::try_from(v).map_err(|_| E::custom(IdError::NotNumeric(v.to_string())))?;
                self.visit_u64(v)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<VmId, E> {
                VmId::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(VmIdVisitor)
    }
}

// =============================================================================
// Task handle
// =============================================================================

/// Proxmox unique task id.
///
/// Layout: `UPID:{node}:{pid}:{pstart}:{starttime}:{type}:{id}:{user}:`,
/// where pid, pstart and starttime are hex. The `id` field is empty for
/// tasks that are not bound to a guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upid {
    raw: String,
    node: String,
    pid: u32,
    start_time: u64,
    task_type: String,
    task_id: String,
    user: String,
}

impl Upid {
    const PREFIX: &'static str = "UPID:";

    /// Parses a task handle.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some(body) = s.strip_prefix(Self::PREFIX) else {
            return Err(IdError::MissingPrefix(s.to_string()));
        };

        let Some(body) = body.strip_suffix(':') else {
            return Err(invalid("missing trailing ':'"));
        };

        let fields: Vec<&str> = body.split(':').collect();
        let &[node, pid, _pstart, start_time, task_type, task_id, user] = fields.as_slice() else {
            return Err(invalid(format!("expected 7 fields, got {}", fields.len())));
        };

        if node.is_empty() {
            return Err(invalid("empty node name"));
        }
        if task_type.is_empty() {
            return Err(invalid("empty task type"));
        }

        let pid = u32::from_str_radix(pid, 16).map_err(|_| invalid(format!("bad pid '{pid}'")))?;
        let start_time = u64::from_str_radix(start_time, 16)
            .map_err(|_| invalid(format!("bad start time '{start_time}'")))?;

        Ok(Self {
            raw: s.to_string(),
            node: node.to_string(),
            pid,
            start_time,
            task_type: task_type.to_string(),
            task_id: task_id.to_string(),
            user: user.to_string(),
        })
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Node the task runs on. Task status must be queried on this node.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Worker process id on the node.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Task start time as a unix timestamp.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Task type, e.g. `qmcreate`, `qmstart`, `download`.
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Object the task acts on (usually the VM id), possibly empty.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// User that submitted the task.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The VM the task targets, if its id field is a VM id.
    pub fn vm_id(&self) -> Option<VmId> {
        VmId::parse(&self.task_id).ok()
    }
}

fn invalid(message: impl Into<String>) -> IdError {
    IdError::InvalidUpid {
        message: message.into(),
    }
}

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Upid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Upid {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl serde::Serialize for Upid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> serde::Deserialize<'de> for Upid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const START_UPID: &str = "UPID:pve1:000A1B2C:0001E240:6530A1F0:qmstart:142:root@pam:";

    #[test]
    fn test_vm_id_parse() {
        let id: VmId = "142".parse().unwrap();
        assert_eq!(id.value(), 142);
        assert_eq!(id.to_string(), "142");
    }

    #[test]
    fn test_vm_id_below_range() {
        assert!(matches!(
            VmId::new(99).unwrap_err(),
            IdError::OutOfRange { value: 99, .. }
        ));
    }

    #[test]
    fn test_vm_id_not_numeric() {
        assert!(matches!(
            "vm-142".parse::<VmId>().unwrap_err(),
            IdError::NotNumeric(_)
        ));
    }

    #[test]
    fn test_vm_id_empty() {
        assert!("".parse::<VmId>().unwrap_err().is_empty());
    }

    #[test]
    fn test_vm_id_json_accepts_string_and_number() {
        let from_str: VmId = serde_json::from_str("\"142\"").unwrap();
        let from_num: VmId = serde_json::from_str("142").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(serde_json::to_string(&from_num).unwrap(), "142");
    }

    #[test]
    fn test_upid_fields() {
        let upid = Upid::parse(START_UPID).unwrap();
        assert_eq!(upid.node(), "pve1");
        assert_eq!(upid.pid(), 0x000A_1B2C);
        assert_eq!(upid.start_time(), 0x6530_A1F0);
        assert_eq!(upid.task_type(), "qmstart");
        assert_eq!(upid.user(), "root@pam");
        assert_eq!(upid.vm_id(), Some(VmId::new(142).unwrap()));
        assert_eq!(upid.to_string(), START_UPID);
    }

    #[test]
    fn test_upid_without_guest() {
        let upid =
            Upid::parse("UPID:pve1:00001234:00000001:65000000:download::root@pam:").unwrap();
        assert_eq!(upid.task_type(), "download");
        assert_eq!(upid.vm_id(), None);
    }

    #[test]
    fn test_upid_token_user() {
        let upid =
            Upid::parse("UPID:pve1:00001234:00000001:65000000:qmstop:142:root@pam!ci:").unwrap();
        assert_eq!(upid.user(), "root@pam!ci");
    }

    #[test]
    fn test_upid_missing_prefix() {
        let err = Upid::parse("pve1:00001234:00000001:65000000:qmstop:142:root@pam:").unwrap_err();
        assert!(matches!(err, IdError::MissingPrefix(_)));
        assert!(err.is_upid_error());
    }

    #[test]
    fn test_upid_wrong_field_count() {
        let err = Upid::parse("UPID:pve1:00001234:qmstop:142:root@pam:").unwrap_err();
        assert!(matches!(err, IdError::InvalidUpid { .. }));
    }

    #[test]
    fn test_upid_bad_hex() {
        let err = Upid::parse("UPID:pve1:zzzz:00000001:65000000:qmstop:142:root@pam:").unwrap_err();
        assert!(matches!(err, IdError::InvalidUpid { .. }));
    }

    proptest! {
        #[test]
        fn vm_id_accepts_exactly_the_proxmox_range(value in 0u32..2_000_000_000) {
            let in_range = (VmId::MIN..=VmId::MAX).contains(&value);
            prop_assert_eq!(VmId::new(value).is_ok(), in_range);
        }
    }
}
