/// Identifies one load attempt.
///
/// Generations come from a single counter per tracker, so a larger value is
/// always a later transition. A completion is only applied while its
/// generation is still the one recorded for its slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}
