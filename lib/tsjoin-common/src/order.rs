/// Sort direction for a shard-section's timestamps, and for the intersector.
///
/// Mirrors `spec.md`'s `{Asc, Desc}` and the on-disk `ts_order` field, which
/// is persisted as `i32 ∈ {-1, 0, 1}` (`Unset` only ever appears in memory,
/// before the second append locks in a direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// Reverse of this order.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }

    /// `true` if `left` sorts before `right` under this order.
    #[must_use]
    pub fn sorts_before(self, left: i64, right: i64) -> bool {
        match self {
            Order::Asc => left < right,
            Order::Desc => left > right,
        }
    }
}

/// The on-disk representation of a shard's ordering: not yet known, or
/// locked to one of the two directions.
///
/// Invariant 4 (`spec.md` §3): once set from the second append, `ts_order`
/// never changes. `OrderState` is the in-memory counterpart that can still be
/// `Unset`; `Order` alone is what gets written to the file header once known
/// (`Unset` is encoded on disk as `0`, see `tsjoin_buffers::common`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Unset,
    Locked(Order),
}

impl OrderState {
    #[must_use]
    pub fn is_unset(self) -> bool {
        matches!(self, OrderState::Unset)
    }

    #[must_use]
    pub fn locked(self) -> Option<Order> {
        match self {
            OrderState::Locked(o) => Some(o),
            OrderState::Unset => None,
        }
    }
}
