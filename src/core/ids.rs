//! Index handles into the scheduler's arenas.
//!
//! Every handle is a plain integer: nodes and boundaries index the tree
//! arena, tasks index the task table, tokens identify entries in the
//! dependency registry. Handles are never reused within one scheduler.

use std::fmt;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident($repr:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) $repr);

        impl $name {
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub const fn raw(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// A node in the tree arena.
    NodeId(u32),
    "n"
);

handle!(
    /// A suspense boundary's persistent state slot.
    BoundaryId(u32),
    "b"
);

handle!(
    /// A scheduled render task. Returned to hosts as the task handle.
    TaskId(u64),
    "t"
);

handle!(
    /// Opaque dependency token. Identity equality only.
    Token(u64),
    "k"
);

pub type TaskHandle = TaskId;
