//! Stack of currently open test items.
//!
//! Items nest: a suite contains tests, a test contains steps. The client
//! pushes a handle when an item starts and pops it when the item finishes,
//! so the top of the stack is always the innermost open item.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ReportError, ReportResult};

/// LIFO registry of open item handles.
///
/// `H` is whatever the owning client uses to refer to an item: a plain
/// [`Id`](crate::model::Id) for the cooperative client, a
/// [`Deferred<Id>`](crate::deferred::Deferred) for the deferred client.
///
/// # Example
///
/// ```
/// use rp_client::stack::ItemStack;
///
/// let stack = ItemStack::new();
/// stack.push("suite");
/// stack.push("test");
/// assert_eq!(stack.peek(), Some("test"));
/// assert_eq!(stack.pop().unwrap(), "test");
/// assert_eq!(stack.peek(), Some("suite"));
/// ```
#[derive(Debug)]
pub struct ItemStack<H> {
    items: Mutex<Vec<H>>,
}

impl<H: Clone> ItemStack<H> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<H>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a newly started item as the current one.
    pub fn push(&self, handle: H) {
        self.lock().push(handle);
    }

    /// Removes and returns the current item.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::ImbalancedLifecycle`] if no item is open.
    pub fn pop(&self) -> ReportResult<H> {
        self.lock().pop().ok_or_else(|| {
            ReportError::ImbalancedLifecycle("item finished with no open item".to_string())
        })
    }

    /// Returns the current item without removing it.
    pub fn peek(&self) -> Option<H> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<H: Clone> Default for ItemStack<H> {
    fn default() -> Self {
        Self::new()
    }
}
