//! Digest Loop
//!
//! A digest re-runs every watcher of a scope and its descendants until a
//! full pass finds nothing dirty and the async queue is empty.
//!
//! # Algorithm
//!
//! 1. Forget the last dirty watcher, and run any pending coalesced apply
//!    work now instead of waiting for its timer.
//! 2. Drain the async queue.
//! 3. Run one pass: every scope depth-first, parent before children, and
//!    each scope's watchers newest first. A changed watcher records itself
//!    as the last dirty watcher. Reaching that same watcher clean again
//!    ends the pass early: everything after it was already clean.
//! 4. Repeat 2-3 while the pass was dirty or the async queue refilled,
//!    giving up with [`Error::Divergence`] once the TTL is spent.
//! 5. Drain the post-digest queue.
//!
//! Errors from watch functions, listeners and queued tasks go to the
//! exception handler; none of them stops the loop.

use tracing::{debug, trace};

use super::Scope;
use crate::error::{Error, Phase, Result};

impl Scope {
    /// Run the digest loop from this scope down.
    pub fn digest(&self) -> Result<()> {
        let tree = self.tree();
        self.begin_phase(Phase::Digest)?;
        *tree.last_dirty.lock() = None;
        debug!(scope = self.id(), "digest started");

        let pending_flush = tree.apply_flush.lock().take();
        if let Some(flush) = pending_flush {
            flush.cancel();
        }
        self.flush_apply_queue();

        let ttl = tree.config.digest_ttl;
        let mut remaining = ttl;
        let mut passes = 0usize;
        let outcome = loop {
            self.drain_async_queue();
            let dirty = self.digest_once();
            passes += 1;
            trace!(scope = self.id(), pass = passes, dirty, "digest pass");

            if !dirty && tree.async_queue.is_empty() {
                break Ok(());
            }
            if remaining == 0 {
                debug!(scope = self.id(), ttl, "digest ttl exhausted");
                break Err(Error::Divergence(ttl));
            }
            remaining -= 1;
        };
        self.clear_phase();
        outcome?;

        while let Some(task) = tree.post_digest.pop() {
            if let Err(err) = task() {
                self.handle_error(err);
            }
        }
        debug!(scope = self.id(), passes, "digest finished");
        Ok(())
    }

    fn drain_async_queue(&self) {
        while let Some(task) = self.tree().async_queue.pop() {
            task.run();
        }
    }

    /// One pass over the subtree. Returns whether any watcher was dirty.
    fn digest_once(&self) -> bool {
        let tree = self.tree();
        let mut dirty = false;
        self.every_scope(&mut |scope: &Scope| {
            for watcher in scope.watchers().iter().rev() {
                if !watcher.is_active() {
                    continue;
                }
                match watcher.check(scope) {
                    Ok(Some(change)) => {
                        *tree.last_dirty.lock() = Some(watcher.id());
                        dirty = true;
                        if let Err(err) = watcher.notify(&change, scope) {
                            scope.handle_error(err);
                        }
                    }
                    Ok(None) => {
                        if *tree.last_dirty.lock() == Some(watcher.id()) {
                            return false;
                        }
                    }
                    Err(err) => scope.handle_error(err),
                }
            }
            true
        });
        dirty
    }

    /// Visit this scope and its descendants, parents first, until `f`
    /// returns `false`. Returns `false` if the walk was stopped.
    pub(crate) fn every_scope(&self, f: &mut dyn FnMut(&Scope) -> bool) -> bool {
        if !f(self) {
            return false;
        }
        for child in self.children() {
            if !child.every_scope(f) {
                return false;
            }
        }
        true
    }
}
