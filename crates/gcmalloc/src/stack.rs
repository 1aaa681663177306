//! Thread stack bounds, for callers that want to scan their own stack as a
//! root range.

/// Bounds of a thread's stack. Stacks grow downward, so `bottom` is the
/// highest address.
#[derive(Debug, Clone, Copy)]
pub struct StackBounds {
    /// The bottom of the stack (highest address).
    pub bottom: usize,
    /// The top of the stack (lowest address).
    pub top: usize,
}

/// Retrieves the stack bounds for the current thread.
///
/// A typical conservative root range is `[approximate_sp, bounds.bottom)`,
/// where the caller takes the address of a local as the stack-pointer
/// approximation.
///
/// # Panics
///
/// Panics if the pthread stack attributes cannot be queried.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_stack_bounds() -> StackBounds {
    use libc::{
        pthread_attr_destroy, pthread_attr_getstack, pthread_attr_t, pthread_getattr_np,
        pthread_self,
    };

    unsafe {
        let mut attr: pthread_attr_t = std::mem::zeroed();
        let ret = pthread_getattr_np(pthread_self(), &raw mut attr);
        assert!(ret == 0, "pthread_getattr_np failed");

        let mut stackaddr: *mut libc::c_void = std::ptr::null_mut();
        let mut stacksize: libc::size_t = 0;
        let ret = pthread_attr_getstack(&raw const attr, &raw mut stackaddr, &raw mut stacksize);
        if ret != 0 {
            pthread_attr_destroy(&raw mut attr);
            panic!("pthread_attr_getstack failed");
        }
        pthread_attr_destroy(&raw mut attr);

        StackBounds {
            bottom: (stackaddr as usize) + stacksize,
            top: stackaddr as usize,
        }
    }
}

/// Retrieves the stack bounds for the current thread (stub for non-Linux).
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_stack_bounds() -> StackBounds {
    unimplemented!("stack bounds retrieval only implemented for Linux")
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contain_local() {
        let local = 0u8;
        let addr = std::ptr::addr_of!(local) as usize;
        let bounds = current_stack_bounds();
        assert!(bounds.top < bounds.bottom);
        assert!(addr >= bounds.top && addr < bounds.bottom);
    }
}
