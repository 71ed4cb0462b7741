//! Layout constraints and their merge lattice.
//!
//! Merging picks the stricter of two compatible constraints and degrades to
//! `Unknown` for incompatible ones. `merge` is commutative and monotone:
//! the result implies both inputs whenever it is a known layout.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutConstraint {
    /// No consistent layout; produced by merging incompatible constraints.
    Unknown,
    /// Bitwise-movable value of unspecified size.
    Trivial,
    TrivialOfExactSize { bits: u32 },
    TrivialOfAtMostSize { bits: u32 },
    /// Any reference-counted object.
    RefCounted,
    /// Natively reference-counted object.
    NativeRefCounted,
    /// Any class instance.
    Class,
    /// Natively implemented class instance.
    NativeClass,
}

impl LayoutConstraint {
    pub fn is_known(self) -> bool {
        self != LayoutConstraint::Unknown
    }

    /// Whether satisfying `self` also satisfies `other`.
    pub fn implies(self, other: LayoutConstraint) -> bool {
        use LayoutConstraint::*;
        if self == other {
            return true;
        }
        match (self, other) {
            (Unknown, _) | (_, Unknown) => false,

            (TrivialOfExactSize { bits }, TrivialOfAtMostSize { bits: max }) => bits <= max,
            (TrivialOfExactSize { .. }, Trivial) => true,
            (TrivialOfAtMostSize { bits }, TrivialOfAtMostSize { bits: max }) => bits <= max,
            (TrivialOfAtMostSize { .. }, Trivial) => true,

            (NativeClass, Class) => true,
            (NativeClass, NativeRefCounted) => true,
            (NativeClass, RefCounted) => true,
            (Class, RefCounted) => true,
            (NativeRefCounted, RefCounted) => true,

            _ => false,
        }
    }

    /// The weakest constraint implying both inputs, or `Unknown` when the
    /// inputs are incompatible.
    pub fn merge(self, other: LayoutConstraint) -> LayoutConstraint {
        if self.implies(other) {
            return self;
        }
        if other.implies(self) {
            return other;
        }
        LayoutConstraint::Unknown
    }
}

impl std::fmt::Display for LayoutConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use LayoutConstraint::*;
        match self {
            Unknown => write!(f, "_UnknownLayout"),
            Trivial => write!(f, "_Trivial"),
            TrivialOfExactSize { bits } => write!(f, "_Trivial({bits})"),
            TrivialOfAtMostSize { bits } => write!(f, "_TrivialAtMost({bits})"),
            RefCounted => write!(f, "_RefCounted"),
            NativeRefCounted => write!(f, "_NativeRefCounted"),
            Class => write!(f, "_Class"),
            NativeClass => write!(f, "_NativeClass"),
        }
    }
}
