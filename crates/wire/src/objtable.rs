//! Reference-counted bidirectional map between an object and its table index.

use std::collections::HashMap;
use std::rc::Rc;

use crate::table::Table;

/// Objects kept in an [`ObjTable`] are identified by pointer identity, not by
/// `Eq`/`Hash` on their contents: two distinct `Rc`s with equal contents are
/// two distinct registrations.
pub trait Identity {
	fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Rc<T> {
	fn identity(&self) -> usize {
		Rc::as_ptr(self) as *const () as usize
	}
}

struct Entry<T> {
	value: T,
	count: usize,
}

/// Wraps a [`Table`] of refcounted entries with a reverse, identity-keyed
/// index so that registering the same object twice returns the same index.
#[derive(Debug, Clone)]
pub struct ObjTable<T> {
	table: Table<Entry<T>>,
	by_identity: HashMap<usize, usize>,
}

impl<T> Default for ObjTable<T> {
	fn default() -> Self {
		Self {
			table: Table::new(),
			by_identity: HashMap::new(),
		}
	}
}

impl<T: Identity + Clone> ObjTable<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `value`, returning its index. If `value` (by identity) is
	/// already present, its refcount is incremented and the existing index
	/// is returned instead of allocating a new one.
	pub fn reg(&mut self, value: T) -> usize {
		let id = value.identity();
		if let Some(&index) = self.by_identity.get(&id) {
			self.table
				.get_mut(index)
				.expect("by_identity points at a live entry")
				.count += 1;
			return index;
		}
		let index = self.table.alloc(Entry { value, count: 1 });
		self.by_identity.insert(id, index);
		index
	}

	/// Decrements the refcount at `index`, freeing the entry once it drops
	/// to zero.
	///
	/// # Panics
	/// Panics if `index` is not currently registered.
	pub fn dereg(&mut self, index: usize) {
		let entry = self
			.table
			.get_mut(index)
			.unwrap_or_else(|| panic!("dereg of unregistered index {index}"));
		entry.count -= 1;
		if entry.count == 0 {
			let id = entry.value.identity();
			self.table.free(index);
			self.by_identity.remove(&id);
		}
	}

	pub fn get(&self, index: usize) -> Option<&T> {
		self.table.get(index).map(|entry| &entry.value)
	}

	pub fn contains(&self, index: usize) -> bool {
		self.table.contains(index)
	}

	pub fn count(&self, index: usize) -> Option<usize> {
		self.table.get(index).map(|entry| entry.count)
	}

	pub fn len(&self) -> usize {
		self.table.len()
	}

	pub fn is_empty(&self) -> bool {
		self.table.is_empty()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn reg_same_object_increments_count() {
		let mut t: ObjTable<Rc<str>> = ObjTable::new();
		let obj: Rc<str> = Rc::from("hello");
		let i1 = t.reg(obj.clone());
		let i2 = t.reg(obj.clone());
		assert_eq!(i1, i2);
		assert_eq!(t.count(i1), Some(2));
	}

	#[test]
	fn reg_distinct_objects_get_distinct_indices() {
		let mut t: ObjTable<Rc<str>> = ObjTable::new();
		let a: Rc<str> = Rc::from("a");
		let b: Rc<str> = Rc::from("a"); // equal contents, distinct identity
		let ia = t.reg(a);
		let ib = t.reg(b);
		assert_ne!(ia, ib);
	}

	#[test]
	fn dereg_to_zero_frees_and_allows_reuse() {
		let mut t: ObjTable<Rc<str>> = ObjTable::new();
		let a: Rc<str> = Rc::from("a");
		let b: Rc<str> = Rc::from("b");
		let ia = t.reg(a.clone());
		let ib = t.reg(b);
		t.dereg(ia);
		assert!(!t.contains(ia));
		// index should be recycled by the underlying Table
		let ia2 = t.reg(a);
		assert_eq!(ia2, ia);
		assert!(t.contains(ib));
	}
}
