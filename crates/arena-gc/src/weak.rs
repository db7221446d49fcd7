//! Weak references and the per-referent lists the collector keeps for them.
//!
//! A [`WeakRef`] never keeps its target alive. When the target dies the
//! collector clears every record pointing at it before the object is freed,
//! then delivers callbacks in discovery order once it has left its
//! non-reentrant section.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

/// Callback run after a weak reference's target has been reclaimed.
pub type WeakCallback = Box<dyn FnOnce(&WeakReference)>;

/// One weak reference record.
pub struct WeakReference {
    target: Cell<Option<NonNull<u8>>>,
    callback: RefCell<Option<WeakCallback>>,
    /// Set while the callback runs.
    delivering: Cell<bool>,
}

impl WeakReference {
    fn new(target: NonNull<u8>, callback: Option<WeakCallback>) -> Self {
        Self {
            target: Cell::new(Some(target)),
            callback: RefCell::new(callback),
            delivering: Cell::new(false),
        }
    }

    /// The referent, or `None` once it has been collected.
    #[must_use]
    pub fn target(&self) -> Option<NonNull<u8>> {
        self.target.get()
    }

    /// Whether the referent has been collected.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.target.get().is_none()
    }

    /// Whether a callback is still pending or currently running.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.delivering.get() || self.callback.borrow().is_some()
    }

    pub(crate) fn clear(&self) {
        self.target.set(None);
    }

    pub(crate) fn take_callback(&self) -> Option<WeakCallback> {
        self.callback.borrow_mut().take()
    }

    /// Run the pending callback, if any. The record reports a callback until
    /// the call returns.
    pub(crate) fn deliver(&self) -> bool {
        let Some(callback) = self.take_callback() else {
            return false;
        };
        self.delivering.set(true);
        callback(self);
        self.delivering.set(false);
        true
    }
}

impl fmt::Debug for WeakReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakReference")
            .field("target", &self.target.get())
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// Mutator-side handle to a weak reference record.
///
/// Dropping every handle abandons the record: the collector discards it the
/// next time it inspects the referent, and its callback never runs.
#[derive(Clone, Debug)]
pub struct WeakRef(Rc<WeakReference>);

impl WeakRef {
    /// The referent, or `None` once it has been collected.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<u8>> {
        self.0.target()
    }

    /// The shared record.
    #[must_use]
    pub fn record(&self) -> &WeakReference {
        &self.0
    }

    /// Whether two handles share a record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Ordered weak reference records, keyed by referent.
#[derive(Debug, Default)]
pub struct WeakRegistry {
    lists: RefCell<HashMap<usize, VecDeque<Rc<WeakReference>>>>,
}

impl WeakRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record targeting `target` and append it to the target's list.
    ///
    /// Abandoned records already on that list are discarded first.
    pub fn add(&self, target: NonNull<u8>, callback: Option<WeakCallback>) -> WeakRef {
        let record = Rc::new(WeakReference::new(target, callback));
        let abandoned = {
            let mut lists = self.lists.borrow_mut();
            let list = lists.entry(target.as_ptr() as usize).or_default();
            let abandoned = split_abandoned(list);
            list.push_back(Rc::clone(&record));
            abandoned
        };
        // Callbacks are dropped with the registry unborrowed.
        drop(abandoned);
        WeakRef(record)
    }

    /// Whether any record still held by the mutator targets `addr`.
    ///
    /// Abandoned records are dropped along the way, and an emptied list is
    /// removed.
    pub fn has_live_refs(&self, addr: usize) -> bool {
        let (live, abandoned) = {
            let mut lists = self.lists.borrow_mut();
            let Some(list) = lists.get_mut(&addr) else {
                return false;
            };
            let abandoned = split_abandoned(list);
            let live = !list.is_empty();
            if !live {
                lists.remove(&addr);
            }
            (live, abandoned)
        };
        drop(abandoned);
        live
    }

    /// Discard abandoned records of every referent. Returns how many went.
    pub fn prune_abandoned(&self) -> usize {
        let abandoned: Vec<_> = {
            let mut lists = self.lists.borrow_mut();
            let abandoned = lists.values_mut().flat_map(split_abandoned).collect();
            lists.retain(|_, list| !list.is_empty());
            abandoned
        };
        abandoned.len()
    }

    /// Detach and return the list for `addr`.
    pub fn take(&self, addr: usize) -> VecDeque<Rc<WeakReference>> {
        self.lists.borrow_mut().remove(&addr).unwrap_or_default()
    }

    /// Records currently listed for `addr`, abandoned ones included.
    #[must_use]
    pub fn count(&self, addr: usize) -> usize {
        self.lists.borrow().get(&addr).map_or(0, VecDeque::len)
    }

    /// Number of referents with at least one listed record.
    #[must_use]
    pub fn referent_count(&self) -> usize {
        self.lists.borrow().len()
    }

    /// Drop every list.
    pub fn clear(&self) {
        self.lists.borrow_mut().clear();
    }
}

/// Remove records no `WeakRef` holds any more, keeping the rest in order.
fn split_abandoned(list: &mut VecDeque<Rc<WeakReference>>) -> Vec<Rc<WeakReference>> {
    let mut abandoned = Vec::new();
    list.retain(|record| {
        let live = Rc::strong_count(record) > 1;
        if !live {
            abandoned.push(Rc::clone(record));
        }
        live
    });
    abandoned
}
