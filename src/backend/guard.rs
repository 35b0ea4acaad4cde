// Scoped handles - destroy on every exit path unless explicitly kept
//
// Builders push each created object into a guard. An early `?` return drops
// the guard, which destroys what was built so far in reverse order. Once the
// whole build succeeds the builder calls `keep()` and takes ownership.

pub struct HandleGuard<H, D: FnMut(H)> {
    handles: Vec<H>,
    destroy: D,
}

impl<H: Copy, D: FnMut(H)> HandleGuard<H, D> {
    pub fn new(destroy: D) -> Self {
        Self {
            handles: Vec::new(),
            destroy,
        }
    }

    pub fn push(&mut self, handle: H) -> H {
        self.handles.push(handle);
        handle
    }

    pub fn handles(&self) -> &[H] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Disarm the guard and hand the handles to the caller
    pub fn keep(mut self) -> Vec<H> {
        std::mem::take(&mut self.handles)
    }
}

impl<H, D: FnMut(H)> Drop for HandleGuard<H, D> {
    fn drop(&mut self) {
        while let Some(handle) = self.handles.pop() {
            (self.destroy)(handle);
        }
    }
}

/// Create one object per input; on the first failure destroy the ones
/// already made and return that error.
pub fn create_each<T, H, E>(
    inputs: impl IntoIterator<Item = T>,
    mut create: impl FnMut(T) -> Result<H, E>,
    destroy: impl FnMut(H),
) -> Result<Vec<H>, E>
where
    H: Copy,
{
    let mut guard = HandleGuard::new(destroy);
    for input in inputs {
        guard.push(create(input)?);
    }
    Ok(guard.keep())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn dropped_guard_destroys_in_reverse_order() {
        let destroyed = RefCell::new(Vec::new());
        {
            let mut guard = HandleGuard::new(|h: u32| destroyed.borrow_mut().push(h));
            guard.push(1);
            guard.push(2);
            guard.push(3);
            assert_eq!(guard.len(), 3);
        }
        assert_eq!(*destroyed.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn kept_handles_are_not_destroyed() {
        let destroyed = RefCell::new(Vec::new());
        let kept = {
            let mut guard = HandleGuard::new(|h: u32| destroyed.borrow_mut().push(h));
            guard.push(7);
            guard.keep()
        };
        assert_eq!(kept, vec![7]);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn create_each_rolls_back_on_failure() {
        let destroyed = RefCell::new(Vec::new());
        let result: Result<Vec<u32>, &str> = create_each(
            0..5u32,
            |i| if i == 3 { Err("boom") } else { Ok(i * 10) },
            |h| destroyed.borrow_mut().push(h),
        );
        assert_eq!(result, Err("boom"));
        assert_eq!(*destroyed.borrow(), vec![20, 10, 0]);
    }

    #[test]
    fn create_each_success_keeps_everything() {
        let destroyed = RefCell::new(Vec::<u32>::new());
        let result: Result<Vec<u32>, ()> =
            create_each(0..3u32, |i| Ok(i + 1), |h| destroyed.borrow_mut().push(h));
        assert_eq!(result, Ok(vec![1, 2, 3]));
        assert!(destroyed.borrow().is_empty());
    }
}
