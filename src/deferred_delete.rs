//! Delay destruction of objects the GPU may still be using.

#[derive(Debug)]
struct Item<T> {
    value: T,
    // Time to live
    ttl: u32,
}

/// Holds values for a fixed number of frames before dropping them.
///
/// # Example
/// ```
/// # use vulkan_rhi::DeletionQueue;
/// let mut queue = DeletionQueue::new(2);
/// queue.push(String::from("retired"));
/// queue.next_frame();
/// assert_eq!(queue.len(), 1);
/// queue.next_frame();
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct DeletionQueue<T> {
    max_ttl: u32,
    items: Vec<Item<T>>,
}

impl<T> DeletionQueue<T> {
    pub fn new(max_ttl: u32) -> DeletionQueue<T> {
        DeletionQueue {
            max_ttl,
            items: vec![],
        }
    }

    /// Pushes a value onto the deletion queue.
    /// Note that this moves out of the parameter so that you can't access an object after
    /// it is pushed.
    pub fn push(&mut self, value: T) {
        self.items.push(Item {
            value,
            ttl: self.max_ttl,
        });
    }

    /// Advance the frame counter by one, decreasing time to live by one on each element.
    /// If time to live of an element reaches zero, it is deleted.
    pub fn next_frame(&mut self) {
        self.items
            .iter_mut()
            .for_each(|item| item.ttl = item.ttl.saturating_sub(1));
        self.items.retain(|item| item.ttl != 0);
    }

    /// Drop every value right away. Only safe once the device is idle.
    pub fn flush(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the values that are still waiting to be dropped.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|item| &item.value)
    }
}
