//! Lock node naming and ordering.
//!
//! Each contender creates an ephemeral sequential node
//! `{lock_path}/_c_{holder}-{marker}{sequence}`. Contenders are ordered by the
//! ten digit sequence the service appends, which is shared by every node
//! under the same parent, so read and write nodes interleave correctly.

const SEQUENCE_LEN: usize = 10;
const HOLDER_PREFIX: &str = "_c_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Exclusive,
    Read,
    Write,
}

impl LockKind {
    pub(crate) fn marker(&self) -> &'static str {
        match self {
            LockKind::Exclusive => "lock-",
            LockKind::Read => "__READ__",
            LockKind::Write => "__WRIT__",
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            LockKind::Exclusive => "exclusive",
            LockKind::Read => "read",
            LockKind::Write => "write",
        }
    }
}

/// Name prefix handed to the service; the sequence is appended on create.
pub(crate) fn node_prefix(
    holder: &str,
    kind: LockKind,
) -> String {
    format!("{}{}-{}", HOLDER_PREFIX, holder, kind.marker())
}

pub(crate) fn sequence(name: &str) -> Option<u64> {
    if name.len() < SEQUENCE_LEN {
        return None;
    }
    let (_, digits) = name.split_at(name.len() - SEQUENCE_LEN);
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Lock contenders ordered by sequence; foreign children are ignored.
pub(crate) fn sort_contenders(children: Vec<String>) -> Vec<String> {
    let mut contenders: Vec<(u64, String)> = children
        .into_iter()
        .filter(|name| name.starts_with(HOLDER_PREFIX))
        .filter_map(|name| sequence(&name).map(|seq| (seq, name)))
        .collect();
    contenders.sort();
    contenders.into_iter().map(|(_, name)| name).collect()
}

fn is_write(name: &str) -> bool {
    name.contains(LockKind::Write.marker())
}

/// The contender `ours` has to wait for, or `None` when it holds the lock.
///
/// Exclusive and write contenders wait for their direct predecessor, so
/// writers queue behind earlier readers. Readers only wait for the first
/// earlier writer, unless the reader's own write lock is already held.
pub(crate) fn blocking_contender<'a>(
    kind: LockKind,
    contenders: &'a [String],
    ours: usize,
    holds_write: bool,
) -> Option<&'a str> {
    match kind {
        LockKind::Exclusive | LockKind::Write => ours.checked_sub(1).map(|prev| contenders[prev].as_str()),
        LockKind::Read if holds_write => None,
        LockKind::Read => contenders[..ours].iter().find(|name| is_write(name)).map(String::as_str),
    }
}
