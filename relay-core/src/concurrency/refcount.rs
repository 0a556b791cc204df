//! Shared-ownership discipline with attached destructor and post-free trap
//! detection (spec.md §4.2, §9 "Method-table objects with post-free trap").
//!
//! The source this crate's behavior is distilled from implements
//! polymorphism with a struct of function pointers and, on final `decref`,
//! overwrites every slot with a thunk that logs and aborts — catching calls
//! through a stale handle. Rust's ownership model gets us the first half
//! ("the destructor runs exactly once") for free via [`std::sync::Arc`] and
//! `Drop`; [`RefCounted`] below exists only to preserve the `attach(dtor,
//! obj)` construction idiom the rest of this crate's code is written
//! against.
//!
//! The second half — detecting a *dynamic* handle (not an owned reference)
//! used after the object it named is gone — doesn't disappear just because
//! we have `Arc`/`Weak`: a `Weak<Session>` that upgrades fine but now points
//! at a *different* session that reused the same table slot is exactly the
//! bug the source's trap was built to catch. [`WeakHandle`] carries a
//! generation stamp alongside the `Weak` and treats a generation mismatch
//! the same way the source treats a dispatch through a trapped method slot.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global generation counter. Every object that can be referenced through a
/// [`WeakHandle`] is stamped with the next value from this counter at
/// construction, so two objects — even if one reuses the table slot the
/// other vacated — never share a generation.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh generation stamp.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Shared-ownership wrapper with an attached destructor (spec.md §4.2
/// `attach(dtor, obj)`).
///
/// `incref`/`decref` are exposed for API parity with the spec's vocabulary;
/// in practice `Clone`/`Drop` already provide atomic, race-free refcounting,
/// so `incref` is `Clone::clone` and `decref` is just letting the value go
/// out of scope. The destructor runs exactly once, when the last `Arc`
/// drops — enforced by the standard library rather than by hand-rolled
/// atomics.
pub struct RefCounted<T> {
    inner: Arc<RefCountedInner<T>>,
}

struct RefCountedInner<T> {
    value: T,
    dtor: Option<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T> Drop for RefCountedInner<T> {
    fn drop(&mut self) {
        if let Some(dtor) = self.dtor.take() {
            dtor(&self.value);
        }
    }
}

impl<T> RefCounted<T> {
    /// Construct a new reference-counted value with no destructor attached.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RefCountedInner { value, dtor: None }),
        }
    }

    /// Construct with a destructor that runs exactly once, when the final
    /// reference drops (spec.md §4.2 `attach`).
    pub fn with_dtor(value: T, dtor: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(RefCountedInner {
                value,
                dtor: Some(Box::new(dtor)),
            }),
        }
    }

    /// Bump the reference count. Equivalent to [`Clone::clone`].
    pub fn incref(&self) -> Self {
        self.clone()
    }

    /// Number of strong references currently outstanding (advisory — can
    /// change immediately after this call returns on another thread).
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// A non-owning, generation-checked handle to this value.
    pub fn downgrade(&self, generation: u64) -> WeakHandle<T> {
        WeakHandle {
            weak: Arc::downgrade(&self.inner),
            generation,
        }
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::ops::Deref for RefCounted<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner.value
    }
}

/// Non-owning handle validated on every access (spec.md §9 "Weak references
/// in the session table"): holding one never keeps the referent alive, and
/// resolving one after the referent's generation has moved on returns
/// `None` — the analogue of the source's post-free trap, minus the abort.
pub struct WeakHandle<T> {
    weak: Weak<RefCountedInner<T>>,
    generation: u64,
}

impl<T> WeakHandle<T> {
    /// Resolve this handle. Returns `None` if the referent has been dropped,
    /// or has been replaced under the same table slot by something with a
    /// different generation.
    pub fn resolve(&self, current_generation: u64) -> Option<RefCounted<T>> {
        if current_generation != self.generation {
            return None;
        }
        self.weak.upgrade().map(|inner| RefCounted { inner })
    }

    /// Like [`resolve`](Self::resolve), but panics with a diagnostic naming
    /// the generation mismatch in debug builds instead of returning `None`.
    /// This is the direct analogue of the source's trap-and-abort: a stale
    /// dynamic handle reaching a live dispatch path is a programming error,
    /// not a recoverable condition, when debug assertions are enabled.
    pub fn resolve_or_trap(&self, current_generation: u64, context: &str) -> RefCounted<T> {
        match self.resolve(current_generation) {
            Some(v) => v,
            None => {
                if cfg!(debug_assertions) {
                    panic!(
                        "handle@{context} used after destruction (expected generation {}, have {})",
                        self.generation, current_generation
                    );
                }
                panic!("handle@{context} used after destruction");
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn destructor_runs_exactly_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let rc = RefCounted::with_dtor(42, move |_| {
            assert!(!ran2.swap(true, Ordering::SeqCst), "dtor ran twice");
        });
        let clone = rc.incref();
        assert_eq!(rc.refcount(), 2);
        drop(clone);
        assert!(!ran.load(Ordering::SeqCst));
        drop(rc);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn weak_handle_resolves_while_alive() {
        let gen = next_generation();
        let rc = RefCounted::new(7);
        let handle = rc.downgrade(gen);
        assert_eq!(*handle.resolve(gen).unwrap(), 7);
    }

    #[test]
    fn weak_handle_fails_after_drop() {
        let gen = next_generation();
        let rc = RefCounted::new(7);
        let handle = rc.downgrade(gen);
        drop(rc);
        assert!(handle.resolve(gen).is_none());
    }

    #[test]
    fn weak_handle_detects_generation_mismatch() {
        let gen_a = next_generation();
        let gen_b = next_generation();
        let rc = RefCounted::new(7);
        let handle = rc.downgrade(gen_a);
        // The table slot now claims gen_b, as if a new object replaced the
        // original at the same key.
        assert!(handle.resolve(gen_b).is_none());
    }

    #[test]
    #[should_panic(expected = "used after destruction")]
    fn resolve_or_trap_panics_on_stale_handle() {
        let gen = next_generation();
        let rc = RefCounted::new(7);
        let handle = rc.downgrade(gen);
        drop(rc);
        let _ = handle.resolve_or_trap(gen, "test::stale");
    }
}
