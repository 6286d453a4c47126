// src/algorithms/tests/mod.rs


/// Start of an aligned minute, so fixed windows line up with test offsets
pub(super) const T0: u64 = 1_699_999_980_000;
