//! Storage key namespaces.

/// Key namespaces for the persisted collections.
///
/// Replaces string literals in storage calls with typed variants so a typo
/// cannot silently create a new namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
	/// Tracked transaction records, keyed by transaction id.
	Transactions,
	/// Domain payments, keyed by payment id.
	Payments,
	/// Seller aggregates, keyed by seller id.
	Sellers,
}

impl StoreKey {
	/// Returns the string representation of the namespace.
	pub fn as_str(&self) -> &'static str {
		match self {
			StoreKey::Transactions => "transactions",
			StoreKey::Payments => "payments",
			StoreKey::Sellers => "sellers",
		}
	}

	/// Returns an iterator over all namespaces.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Transactions, Self::Payments, Self::Sellers].into_iter()
	}
}
