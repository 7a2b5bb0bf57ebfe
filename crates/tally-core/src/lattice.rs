//! Join-semilattice trait.
//!
//! A join-semilattice (S, ⊔) satisfies:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence:  a ⊔ a = a
//!
//! Replicas that exchange states in any order, any number of times, end in
//! the same state once they have seen the same inputs.

/// State that merges by least upper bound.
pub trait Lattice: Clone + PartialEq {
    /// Identity for [`join`](Lattice::join).
    fn bottom() -> Self;

    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    /// `self ≤ other`, i.e. `self ⊔ other == other`.
    fn leq(&self, other: &Self) -> bool {
        &self.join(other) == other
    }

    /// Neither state has seen everything the other has.
    fn concurrent_with(&self, other: &Self) -> bool {
        !self.leq(other) && !other.leq(self)
    }

    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// Join every state produced by `states`, starting from bottom.
    fn join_all<'a, I>(states: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        states
            .into_iter()
            .fold(Self::bottom(), |acc, state| acc.join(state))
    }
}
