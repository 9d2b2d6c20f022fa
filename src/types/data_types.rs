/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Position of a replica in the replica set, in the range `[0, N)`.
///
/// The replica identified by `ReplicaID::new(i)` is the replica whose
/// [`VerifyingKey`](ed25519_dalek::VerifyingKey) sits at index `i` of
/// [`Configuration::replicas`](crate::replica::Configuration::replicas).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ReplicaID(u32);

impl ReplicaID {
    /// Create a new `ReplicaID` wrapping `int`.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `ReplicaID`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Get the inner value as an index into the replica set.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Epoch number. Starts at 0 and increases by 1 (or more) every time the replica completes an epoch
/// change.
///
/// The epoch decides which replica is the primary, and scopes every message that is only meaningful
/// for a particular primary.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Epoch(u64);

impl Epoch {
    /// Create a new `Epoch` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `Epoch`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `Epoch`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Epoch {
    type Output = Epoch;
    fn add(self, rhs: u64) -> Self::Output {
        Epoch::new(self.0.add(rhs))
    }
}

/// Sequence number assigned by the ordering core. The first ordered entry gets `SeqNo(1)`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SeqNo(u64);

impl SeqNo {
    /// Create a new `SeqNo` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// The sequence number that precedes every ordered entry.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `SeqNo`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for SeqNo {
    type Output = SeqNo;
    fn add(self, rhs: u64) -> Self::Output {
        SeqNo::new(self.0.add(rhs))
    }
}

impl AddAssign<u64> for SeqNo {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

/// Height of a block in the blockchain kept by the [`Stack`](crate::stack::Stack).
///
/// The genesis block sits at height 0, so the height of the next block to be committed equals the
/// current blockchain size.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash.
///
/// Request digests, execution outcome digests, ordering digests and block hashes are all SHA256
/// hashes stored in this type.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
///
/// These are produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported
/// from the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0[..8].fmt(f)
    }
}

/// Size parameters derived from the number of replicas `N`.
///
/// `f` is the largest number of Byzantine replicas the replica set tolerates, `floor((N-1)/3)`.
/// `quorum` is the smallest set size such that any two sets of that size intersect in at least one
/// correct replica, `floor((N+f)/2) + 1`. When `N = 3f+1` this is exactly `2f+1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicaSetSize {
    n: usize,
}

impl ReplicaSetSize {
    pub const fn new(n: usize) -> Self {
        Self { n }
    }

    pub const fn n(&self) -> usize {
        self.n
    }

    pub const fn f(&self) -> usize {
        if self.n == 0 {
            0
        } else {
            (self.n - 1) / 3
        }
    }

    pub const fn quorum(&self) -> usize {
        (self.n + self.f()) / 2 + 1
    }

    /// Iterate through the IDs of every replica in the replica set.
    pub fn ids(&self) -> impl Iterator<Item = ReplicaID> {
        (0..self.n as u32).map(ReplicaID::new)
    }

    /// Get the primary of `epoch`: `(epoch + seed) mod N`.
    pub fn primary(&self, epoch: Epoch, seed: u64) -> ReplicaID {
        let n = self.n.max(1) as u64;
        ReplicaID::new((epoch.int().wrapping_add(seed) % n) as u32)
    }
}
