/// Identifies one page fetch in a deterministic, stable way.
///
/// A fresh handle is minted every time a (tile, page) pair is scheduled, so a
/// completion can be matched against the attempt that currently owns the page.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Request(pub u64);
