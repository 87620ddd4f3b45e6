use std::sync::Mutex;

/// Handles with the high bit set are requests/responses; the low half of
/// the space belongs to server-initiated callbacks, so the allocator never
/// strays into it.
const FIRST_HANDLE: u32 = 0x8000_0001;
const WRAP_TO: u32 = 0x8000_0000;

/// Allocates handles for outgoing calls.
///
/// A single connection owns one allocator; it is safe to share across
/// concurrent callers because allocation is a short, mutex-guarded
/// increment with no await inside the critical section.
pub struct HandleAllocator {
    next: Mutex<u32>,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleAllocator {
    pub fn new() -> Self {
        HandleAllocator {
            next: Mutex::new(FIRST_HANDLE),
        }
    }

    /// Allocate the next handle, wrapping back to `WRAP_TO` just before the
    /// counter would reach `0xFFFF_FFFF`.
    pub fn next(&self) -> u32 {
        let mut guard = self.next.lock().expect("handle mutex poisoned");
        let handle = *guard;
        *guard = if handle == u32::MAX - 1 { WRAP_TO } else { handle + 1 };
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_increasing_handles_in_response_range() {
        let alloc = HandleAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_eq!(a, FIRST_HANDLE);
        assert_eq!(b, FIRST_HANDLE + 1);
        assert!(a & 0x8000_0000 != 0);
        assert!(b & 0x8000_0000 != 0);
    }

    #[test]
    fn wraps_before_reaching_the_top_of_the_range() {
        let alloc = HandleAllocator::new();
        *alloc.next.lock().unwrap() = u32::MAX - 1;
        let a = alloc.next();
        assert_eq!(a, u32::MAX - 1);
        let b = alloc.next();
        assert_eq!(b, WRAP_TO);
    }

    #[test]
    fn never_allocates_a_handle_with_the_high_bit_clear() {
        let alloc = HandleAllocator::new();
        *alloc.next.lock().unwrap() = u32::MAX - 3;
        for _ in 0..10 {
            let h = alloc.next();
            assert!(h & 0x8000_0000 != 0, "allocated {h:#x} outside the response range");
        }
    }
}
