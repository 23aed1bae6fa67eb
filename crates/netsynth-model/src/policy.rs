//! Connection policies and their merge rule
//!
//! A policy describes how a connection transports data. When several hops
//! of the same logical path carry policies (a composite forwarding a port,
//! two tasks being merged into one), they are reduced with
//! [`ConnectionPolicy::merge`]:
//!
//! - an empty policy is absorbed by the other side
//! - transport kinds must agree
//! - buffer sizes are reconciled by taking the maximum
//! - every other field must match exactly

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};

/// Transport kind of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Last-value sample
    #[default]
    Data,

    /// Bounded FIFO
    Buffer,
}

/// Locking scheme of the connection's storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Mutex protected
    Locked,

    /// Lock-free storage
    LockFree,
}

/// Structured connection policy
///
/// Every field is optional; a policy with no field set is *empty* and acts
/// as the identity of [`ConnectionPolicy::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    /// Transport kind (defaults to [`TransportKind::Data`] when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransportKind>,

    /// Buffer size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,

    /// Locking scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockPolicy>,

    /// Pull (reader-driven) transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<bool>,

    /// Whether the last written sample is replayed on connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
}

impl ConnectionPolicy {
    /// Empty policy
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Explicit data policy
    #[inline]
    #[must_use]
    pub fn data() -> Self {
        Self {
            kind: Some(TransportKind::Data),
            ..Self::default()
        }
    }

    /// Buffer policy of the given size
    #[inline]
    #[must_use]
    pub fn buffer(size: u32) -> Self {
        Self {
            kind: Some(TransportKind::Buffer),
            size: Some(size),
            ..Self::default()
        }
    }

    /// Set the lock policy
    #[inline]
    #[must_use]
    pub fn with_lock(mut self, lock: LockPolicy) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Set pull mode
    #[inline]
    #[must_use]
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = Some(pull);
        self
    }

    /// Set init mode
    #[inline]
    #[must_use]
    pub fn with_init(mut self, init: bool) -> Self {
        self.init = Some(init);
        self
    }

    /// Whether no field is set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.size.is_none()
            && self.lock.is_none()
            && self.pull.is_none()
            && self.init.is_none()
    }

    /// Transport kind, with unset meaning data
    #[inline]
    #[must_use]
    pub fn effective_kind(&self) -> TransportKind {
        self.kind.unwrap_or_default()
    }

    /// Reconcile two policies describing the same logical path
    ///
    /// Only a policy with no field set is absorbed. Otherwise every field
    /// other than the buffer size must be equal on both sides, and a field
    /// set on one side only does not equal the unset side. The transport
    /// kind is the exception: unset means data.
    ///
    /// # Errors
    /// [`PolicyError::Incompatible`] naming the first field that cannot be
    /// reconciled, with both values.
    pub fn merge(&self, other: &Self) -> Result<Self, PolicyError> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(other.clone());
        }

        let kind = self.effective_kind();
        if kind != other.effective_kind() {
            return Err(incompatible("type", &kind, &other.effective_kind()));
        }

        let size = match kind {
            TransportKind::Buffer => self.size.max(other.size),
            TransportKind::Data => {
                same_field("size", self.size, other.size)?;
                self.size
            }
        };
        same_field("lock", self.lock, other.lock)?;
        same_field("pull", self.pull, other.pull)?;
        same_field("init", self.init, other.init)?;

        Ok(Self {
            kind: self.kind.or(other.kind),
            size,
            lock: self.lock,
            pull: self.pull,
            init: self.init,
        })
    }
}

impl std::fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        write!(f, "{:?}", self.effective_kind())?;
        if let Some(size) = self.size {
            write!(f, " size={size}")?;
        }
        if let Some(lock) = self.lock {
            write!(f, " lock={lock:?}")?;
        }
        if let Some(pull) = self.pull {
            write!(f, " pull={pull}")?;
        }
        if let Some(init) = self.init {
            write!(f, " init={init}")?;
        }
        Ok(())
    }
}

/// Reduce a forwarding chain to a single effective policy, left to right
///
/// # Errors
/// The first [`PolicyError`] met along the chain.
pub fn merge_policy_chain<'a, I>(policies: I) -> Result<ConnectionPolicy, PolicyError>
where
    I: IntoIterator<Item = &'a ConnectionPolicy>,
{
    policies
        .into_iter()
        .try_fold(ConnectionPolicy::empty(), |acc, next| acc.merge(next))
}

fn same_field<T>(field: &'static str, left: Option<T>, right: Option<T>) -> Result<(), PolicyError>
where
    T: PartialEq + std::fmt::Debug,
{
    if left == right {
        Ok(())
    } else {
        Err(incompatible(field, &left, &right))
    }
}

fn incompatible(
    field: &'static str,
    left: &impl std::fmt::Debug,
    right: &impl std::fmt::Debug,
) -> PolicyError {
    PolicyError::Incompatible {
        field,
        left: format!("{left:?}"),
        right: format!("{right:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_absorbed() {
        let p = ConnectionPolicy::buffer(4).with_lock(LockPolicy::Locked);
        assert_eq!(p.merge(&ConnectionPolicy::empty()).unwrap(), p);
        assert_eq!(ConnectionPolicy::empty().merge(&p).unwrap(), p);
    }

    #[test]
    fn buffer_takes_max_size() {
        let merged = ConnectionPolicy::buffer(4)
            .merge(&ConnectionPolicy::buffer(10))
            .unwrap();
        assert_eq!(merged.size, Some(10));
        assert_eq!(merged.kind, Some(TransportKind::Buffer));
    }

    #[test]
    fn kind_mismatch_names_type() {
        let err = ConnectionPolicy::data()
            .merge(&ConnectionPolicy::buffer(2))
            .unwrap_err();
        assert_eq!(err.field(), "type");
        assert!(err.to_string().contains("Data"));
        assert!(err.to_string().contains("Buffer"));
    }

    #[test]
    fn unset_kind_means_data() {
        let lock_only = ConnectionPolicy::empty().with_lock(LockPolicy::LockFree);
        let merged = lock_only.merge(&ConnectionPolicy::data().with_lock(LockPolicy::LockFree));
        assert!(merged.is_ok());
        assert!(lock_only.merge(&ConnectionPolicy::buffer(1)).is_err());
    }

    #[test]
    fn data_size_must_match() {
        let mut a = ConnectionPolicy::data();
        a.size = Some(1);
        let err = a.merge(&ConnectionPolicy::data().with_pull(false)).unwrap_err();
        assert_eq!(err.field(), "size");
    }

    #[test]
    fn field_set_on_one_side_only_differs() {
        let locked = ConnectionPolicy::data().with_lock(LockPolicy::Locked);
        let err = locked.merge(&ConnectionPolicy::data()).unwrap_err();
        assert_eq!(err.field(), "lock");
        assert!(err.to_string().contains("None"));
        let err = ConnectionPolicy::buffer(2)
            .merge(&ConnectionPolicy::buffer(2).with_init(true))
            .unwrap_err();
        assert_eq!(err.field(), "init");
    }

    #[test]
    fn chain_merges_left_to_right() {
        let chain = [
            ConnectionPolicy::empty(),
            ConnectionPolicy::buffer(3),
            ConnectionPolicy::empty(),
            ConnectionPolicy::buffer(8),
        ];
        let merged = merge_policy_chain(chain.iter()).unwrap();
        assert_eq!(merged, ConnectionPolicy::buffer(8));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(ConnectionPolicy::empty().to_string(), "{}");
        assert_eq!(ConnectionPolicy::buffer(5).to_string(), "Buffer size=5");
    }
}
